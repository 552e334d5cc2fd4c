//! Shared subprocess runner for gates and the command tools.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Captured result of a shell command.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Run `command` through `sh -c` in `cwd`, capturing both streams, each
/// capped at `max_capture` bytes. On timeout the child is killed and
/// `timed_out` is set.
pub async fn run_shell(
    command: &str,
    cwd: &Path,
    timeout: Duration,
    max_capture: usize,
) -> std::io::Result<ShellOutput> {
    let start = std::time::Instant::now();
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdout_pipe = child.stdout.take().expect("stdout piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        buf
    });

    let (timed_out, exit_code) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => (false, status?.code().unwrap_or(-1)),
        Err(_) => {
            let _ = child.kill().await;
            (true, -1)
        }
    };

    let stdout_bytes = stdout_task.await.unwrap_or_default();
    let stderr_bytes = stderr_task.await.unwrap_or_default();

    Ok(ShellOutput {
        exit_code,
        stdout: cap_bytes(&stdout_bytes, max_capture),
        stderr: cap_bytes(&stderr_bytes, max_capture),
        duration: start.elapsed(),
        timed_out,
    })
}

fn cap_bytes(bytes: &[u8], max: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max {
        return text.into_owned();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... [output truncated]", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_streams_and_exit_code() {
        let out = run_shell(
            "echo hello; echo oops >&2; exit 3",
            Path::new("."),
            Duration::from_secs(10),
            64 * 1024,
        )
        .await
        .unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(out.stdout.contains("hello"));
        assert!(out.stderr.contains("oops"));
        assert!(!out.timed_out);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let out = run_shell(
            "sleep 30",
            Path::new("."),
            Duration::from_millis(100),
            1024,
        )
        .await
        .unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn output_is_capped() {
        let out = run_shell(
            "yes x | head -c 100000",
            Path::new("."),
            Duration::from_secs(10),
            1000,
        )
        .await
        .unwrap();
        assert!(out.stdout.len() < 1100);
        assert!(out.stdout.contains("[output truncated]"));
    }
}
