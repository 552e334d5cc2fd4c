//! Lint gate: autofix first, then lint, with parsed per-finding items.
//!
//! Supported linters are taken from the workspace's `lint_tools` inventory
//! (`ruff` for Python, `eslint` for JS/TS). A `lint_command` override runs
//! verbatim for full-project checks.

use super::{Gate, GateItem, GateOutcome, GateReport};
use crate::exec::{ShellOutput, run_shell};
use crate::workspace::Workspace;
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

const LINT_TIMEOUT: Duration = Duration::from_secs(120);
const CAPTURE_CAP: usize = 256 * 1024;

pub struct LintGate;

impl LintGate {
    pub fn new() -> Self {
        Self
    }

    fn tool(&self, workspace: &Workspace) -> Option<&'static str> {
        for tool in &workspace.config.lint_tools {
            match tool.as_str() {
                "ruff" => return Some("ruff"),
                "eslint" => return Some("eslint"),
                _ => continue,
            }
        }
        None
    }

    async fn run_target(&self, workspace: &Workspace, target: &str) -> GateOutcome {
        let Some(tool) = self.tool(workspace) else {
            return GateOutcome::Skipped("no supported lint tool configured".into());
        };

        // Autofix before lint so trivially fixable issues never reach the
        // agent.
        let autofix = match tool {
            "ruff" => format!("ruff check --fix --quiet {target} && ruff format --quiet {target}"),
            _ => format!("npx eslint --fix {target}"),
        };
        let _ = run_shell(&autofix, &workspace.root, LINT_TIMEOUT, CAPTURE_CAP).await;

        let lint_cmd = match (&workspace.config.lint_command, tool) {
            (Some(override_cmd), _) if target == "." => override_cmd.clone(),
            (_, "ruff") => format!("ruff check --output-format=concise {target}"),
            _ => format!("npx eslint --format unix {target}"),
        };

        let output = match run_shell(&lint_cmd, &workspace.root, LINT_TIMEOUT, CAPTURE_CAP).await {
            Ok(output) => output,
            Err(e) => return GateOutcome::Skipped(format!("failed to spawn linter: {e}")),
        };

        if output.timed_out {
            return GateOutcome::Skipped("linter timed out".into());
        }
        match output.exit_code {
            0 => GateOutcome::Pass,
            1 => {
                let items = parse_findings(&output);
                let total = items.len();
                if total == 0 {
                    // Exit 1 with nothing parseable is a tool problem, not a
                    // lint failure.
                    return GateOutcome::Skipped("linter produced no parseable findings".into());
                }
                GateOutcome::Fail(GateReport {
                    gate: "lint".into(),
                    items,
                    total_failures: total,
                    duration_ms: output.duration.as_millis() as u64,
                    exit_code: output.exit_code,
                })
            }
            // Usage errors, crashes, missing binaries surface as exit >= 2.
            code => GateOutcome::Skipped(format!("linter infrastructure error (exit {code})")),
        }
    }
}

/// `path:line:col: CODE message` (ruff concise, eslint unix format).
fn finding_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<file>[^\s:][^:]*):(?P<line>\d+):(?:\d+:)?\s*(?:\[?(?P<code>[A-Z]+\d+)\]?)?\s*(?P<msg>.+)$")
            .expect("valid finding regex")
    })
}

fn parse_findings(output: &ShellOutput) -> Vec<GateItem> {
    let re = finding_regex();
    output
        .stdout
        .lines()
        .chain(output.stderr.lines())
        .filter_map(|line| {
            let caps = re.captures(line.trim())?;
            Some(GateItem {
                message: caps["msg"].trim().to_string(),
                file: Some(format!("{}:{}", &caps["file"], &caps["line"])),
                code: caps.name("code").map(|c| c.as_str().to_string()),
            })
        })
        .collect()
}

#[async_trait]
impl Gate for LintGate {
    fn name(&self) -> &'static str {
        "lint"
    }

    fn is_available(&self, workspace: &Workspace) -> bool {
        self.tool(workspace).is_some()
    }

    async fn run_on_file(&self, workspace: &Workspace, path: &Path) -> GateOutcome {
        let lintable = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("py" | "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs")
        );
        if !lintable {
            return GateOutcome::Skipped("not a lintable file".into());
        }
        let rel = path
            .strip_prefix(&workspace.root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();
        self.run_target(workspace, &rel).await
    }

    async fn run_all(&self, workspace: &Workspace) -> GateOutcome {
        self.run_target(workspace, ".").await
    }
}
