//! `read_file`: file contents with head/tail truncation for large files.

use super::{AgentTool, ToolContext, ToolOutcome, required_str, resolve_path};
use crate::errors::ToolError;
use crate::provider::ToolSpec;
use async_trait::async_trait;

/// Above this size the observation is truncated to head + tail.
const FULL_CONTENT_CAP: usize = 8_000;
const HEAD_LINES: usize = 200;
const TAIL_LINES: usize = 50;

pub struct ReadFileTool;

#[async_trait]
impl AgentTool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "read_file".into(),
            description: "Read a file from the workspace. Optionally restrict to a line range."
                .into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Workspace-relative file path" },
                    "start_line": { "type": "integer", "minimum": 1 },
                    "end_line": { "type": "integer", "minimum": 1 }
                },
                "required": ["path"]
            }),
        }
    }

    async fn call(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        let raw_path = required_str(&args, "path", "read_file")?;
        let path = resolve_path(&ctx.workspace.root, raw_path)?;
        if !path.exists() {
            return Err(ToolError::FileNotFound { path });
        }

        let content = std::fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();

        let start = args
            .get("start_line")
            .and_then(|v| v.as_u64())
            .map(|n| (n as usize).saturating_sub(1));
        let end = args.get("end_line").and_then(|v| v.as_u64()).map(|n| n as usize);

        let text = match (start, end) {
            (Some(s), e) => {
                let s = s.min(lines.len());
                let e = e.unwrap_or(lines.len()).min(lines.len()).max(s);
                numbered(&lines[s..e], s + 1)
            }
            (None, Some(e)) => numbered(&lines[..e.min(lines.len())], 1),
            (None, None) if content.len() > FULL_CONTENT_CAP => {
                let head = numbered(&lines[..HEAD_LINES.min(lines.len())], 1);
                let tail_start = lines.len().saturating_sub(TAIL_LINES);
                let tail = numbered(&lines[tail_start..], tail_start + 1);
                format!(
                    "{head}\n... [{} lines omitted] ...\n{tail}",
                    lines.len().saturating_sub(HEAD_LINES + TAIL_LINES)
                )
            }
            (None, None) => numbered(&lines, 1),
        };

        Ok(ToolOutcome::text(text))
    }
}

fn numbered(lines: &[&str], first_number: usize) -> String {
    lines
        .iter()
        .enumerate()
        .map(|(i, l)| format!("{:>5} | {l}", first_number + i))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::GateSet;
    use crate::workspace::Workspace;
    use tempfile::TempDir;

    async fn read(dir: &TempDir, args: serde_json::Value) -> Result<ToolOutcome, ToolError> {
        let workspace = Workspace::init(dir.path()).unwrap();
        let ctx = ToolContext::new(workspace, GateSet::standard());
        ReadFileTool.call(args, &ctx).await
    }

    #[tokio::test]
    async fn reads_whole_small_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\ny = 2\n").unwrap();
        let outcome = read(&dir, serde_json::json!({"path": "a.py"})).await.unwrap();
        assert!(outcome.text.contains("1 | x = 1"));
        assert!(outcome.text.contains("2 | y = 2"));
    }

    #[tokio::test]
    async fn truncates_large_files_to_head_and_tail() {
        let dir = TempDir::new().unwrap();
        let body: String = (0..1000).map(|i| format!("line {i}\n")).collect();
        std::fs::write(dir.path().join("big.py"), &body).unwrap();

        let outcome = read(&dir, serde_json::json!({"path": "big.py"})).await.unwrap();
        assert!(outcome.text.contains("line 0"));
        assert!(outcome.text.contains("line 199"));
        assert!(!outcome.text.contains("line 500 "));
        assert!(outcome.text.contains("line 999"));
        assert!(outcome.text.contains("lines omitted"));
    }

    #[tokio::test]
    async fn line_range_is_honored() {
        let dir = TempDir::new().unwrap();
        let body: String = (1..=20).map(|i| format!("row {i}\n")).collect();
        std::fs::write(dir.path().join("r.py"), &body).unwrap();

        let outcome = read(
            &dir,
            serde_json::json!({"path": "r.py", "start_line": 5, "end_line": 7}),
        )
        .await
        .unwrap();
        assert!(outcome.text.contains("5 | row 5"));
        assert!(outcome.text.contains("7 | row 7"));
        assert!(!outcome.text.contains("row 8"));
    }

    #[tokio::test]
    async fn escaping_path_is_denied() {
        let dir = TempDir::new().unwrap();
        let err = read(&dir, serde_json::json!({"path": "../secrets.txt"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = read(&dir, serde_json::json!({"path": "nope.py"})).await.unwrap_err();
        assert!(matches!(err, ToolError::FileNotFound { .. }));
    }
}
