//! CLI command handlers: thin adapters over the core.

pub mod artifacts;
pub mod blocker;
pub mod checkpoint;
pub mod config;
pub mod events;
pub mod prd;
pub mod review;
pub mod tasks;
pub mod work;
pub mod workspace;

use crate::agent::AgentConfig;
use crate::provider::ChatProvider;
use crate::provider::mock::ScriptedProvider;
use crate::runtime::Runtime;
use crate::store::models::Task;
use crate::workspace::Workspace;
use anyhow::{Result, bail};
use std::path::Path;
use std::sync::Arc;

/// Open the workspace rooted at (or above) `project_dir`.
pub fn open_workspace(project_dir: &Path) -> Result<Workspace> {
    Workspace::open(project_dir)
}

/// Resolve a CLI task argument: a task number (what listings show) or a
/// full opaque id.
pub fn resolve_task(workspace: &Workspace, arg: &str) -> Result<Task> {
    if let Ok(number) = arg.parse::<i64>() {
        return Ok(workspace.store.get_task_by_number(workspace.id(), number)?);
    }
    Ok(workspace.store.get_task(arg)?)
}

/// The LLM provider is an external collaborator; the core ships only the
/// contract. `CODEFRAME_PROVIDER=mock` selects the scripted offline
/// provider (every call answers with a terminal text), which is enough for
/// smoke-testing the loop end to end.
pub fn resolve_provider() -> Result<Arc<dyn ChatProvider>> {
    match std::env::var("CODEFRAME_PROVIDER").as_deref() {
        Ok("mock") => Ok(Arc::new(ScriptedProvider::new())),
        Ok(other) => bail!("Unknown provider '{other}'. This build recognizes: mock"),
        Err(_) => bail!(
            "No LLM provider configured. Set CODEFRAME_PROVIDER (this build recognizes: mock) \
             or wire a provider adapter."
        ),
    }
}

/// Build the single-task runtime for provider-backed commands.
pub fn build_runtime(workspace: Workspace) -> Result<Arc<Runtime>> {
    let provider = resolve_provider()?;
    Ok(Arc::new(Runtime::new(
        workspace,
        provider,
        AgentConfig::default(),
    )))
}
