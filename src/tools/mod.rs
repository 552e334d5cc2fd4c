//! The bounded tool surface: exactly seven tools the agent may invoke.
//!
//! Every tool has a JSON-schema parameter spec, a deterministic executor and
//! a result-truncation policy. All paths are normalized and rejected if they
//! escape the workspace root. Tool failures become observations for the
//! model, never run-fatal errors.

mod create_file;
mod edit_file;
mod list_files;
mod read_file;
mod run_command;
mod run_tests;
mod search;

pub use create_file::CreateFileTool;
pub use edit_file::EditFileTool;
pub use list_files::ListFilesTool;
pub use read_file::ReadFileTool;
pub use run_command::RunCommandTool;
pub use run_tests::RunTestsTool;
pub use search::SearchCodebaseTool;

use crate::errors::ToolError;
use crate::gates::{GateOutcome, GateSet};
use crate::provider::ToolSpec;
use crate::workspace::Workspace;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shared context handed to every tool call.
#[derive(Clone)]
pub struct ToolContext {
    pub workspace: Workspace,
    pub gates: GateSet,
    pub cancel: CancellationToken,
    pub command_timeout: Duration,
}

impl ToolContext {
    pub fn new(workspace: Workspace, gates: GateSet) -> Self {
        Self {
            workspace,
            gates,
            cancel: CancellationToken::new(),
            command_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Result of a tool call: the observation text plus any files it modified
/// (workspace-relative), which the agent reports as FILES_MODIFIED.
#[derive(Debug, Clone, Default)]
pub struct ToolOutcome {
    pub text: String,
    pub files_modified: Vec<String>,
}

impl ToolOutcome {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            files_modified: Vec::new(),
        }
    }
}

/// A single tool callable by the model.
#[async_trait]
pub trait AgentTool: Send + Sync {
    fn name(&self) -> &'static str;

    /// Descriptor shipped to the provider (name, description, JSON schema).
    fn spec(&self) -> ToolSpec;

    async fn call(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutcome, ToolError>;
}

/// The closed registry of the seven tools.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn AgentTool>>,
}

impl ToolRegistry {
    pub fn standard() -> Self {
        Self {
            tools: vec![
                Arc::new(ReadFileTool),
                Arc::new(ListFilesTool),
                Arc::new(SearchCodebaseTool),
                Arc::new(CreateFileTool),
                Arc::new(EditFileTool),
                Arc::new(RunTestsTool),
                Arc::new(RunCommandTool),
            ],
        }
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn AgentTool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Execute a call, rendering failures into the observation so the model
    /// can react to them.
    pub async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> ToolOutcome {
        let Some(tool) = self.get(name) else {
            return ToolOutcome::text(format!(
                "ERROR: unknown tool '{name}'. Available tools: {}",
                self.tools
                    .iter()
                    .map(|t| t.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        };
        match tool.call(args, ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!(tool = name, error = %e, "tool call failed");
                ToolOutcome::text(format!("ERROR: {e}"))
            }
        }
    }
}

/// Resolve a model-supplied path against the workspace root, rejecting any
/// form of escape. Purely lexical so not-yet-existing paths resolve too.
pub fn resolve_path(root: &Path, raw: &str) -> Result<PathBuf, ToolError> {
    let supplied = Path::new(raw);
    let joined = if supplied.is_absolute() {
        supplied.to_path_buf()
    } else {
        root.join(supplied)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(ToolError::PermissionDenied {
                        path: raw.to_string(),
                    });
                }
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }

    if !normalized.starts_with(root) {
        return Err(ToolError::PermissionDenied {
            path: raw.to_string(),
        });
    }
    Ok(normalized)
}

/// Whether a path sits in a directory the agent never needs to see
/// (VCS internals, virtualenvs, build output).
pub fn is_ignored_path(path: &Path) -> bool {
    list_files::is_ignored(path)
}

/// Workspace-relative rendering for observations and events.
pub fn relative_to_root(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}

/// Render the inline per-file gate feedback appended to write observations.
pub(crate) async fn inline_gate_feedback(ctx: &ToolContext, path: &Path) -> String {
    let results = ctx.gates.run_on_file(&ctx.workspace, path).await;
    if results.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n\n--- inline verification ---\n");
    for (gate, outcome) in results {
        match outcome {
            GateOutcome::Pass => out.push_str(&format!("{gate}: pass\n")),
            GateOutcome::Fail(report) => out.push_str(&report.describe()),
            GateOutcome::Skipped(_) => {}
        }
    }
    out
}

pub(crate) fn required_str<'a>(
    args: &'a serde_json::Value,
    key: &str,
    tool: &'static str,
) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or(ToolError::InvalidArgs {
            tool,
            message: format!("missing required string field '{key}'"),
        })
}
