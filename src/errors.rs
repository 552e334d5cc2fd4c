//! Typed error hierarchy for the CodeFRAME core.
//!
//! One enum per subsystem:
//! - `StoreError` — state store and repository failures
//! - `ProviderError` — LLM provider failures (retryable vs fatal)
//! - `ToolError` — tool surface failures observed by the agent
//! - `EditError` — search/replace editor failures
//! - `AgentError` — agent engine infrastructure failures
//! - `ConductorError` — batch conductor failures
//! - `CheckpointError` — checkpoint create/restore failures

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the state store and its typed repositories.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid task transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Task {task_id} may not start: dependency {dependency_id} is not complete")]
    DependencyNotSatisfied {
        task_id: String,
        dependency_id: String,
    },

    #[error("Dependency cycle involving task {task_id}")]
    DependencyCycle { task_id: String },

    #[error("Database locked after {attempts} attempts")]
    DatabaseLocked { attempts: u32 },

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("A run is already RUNNING for task {task_id}")]
    RunAlreadyActive { task_id: String },

    #[error("Migration {version} failed: {message}")]
    Migration { version: u32, message: String },

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Errors from the LLM provider interface.
///
/// `is_retryable` drives the backoff policy in `provider::chat_with_retry`.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Rate limited by provider")]
    RateLimited,

    #[error("Provider server error: {0}")]
    ServerError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Context window exceeded")]
    ContextWindowExceeded,

    #[error("Provider request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Request cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Transient failures eligible for exponential backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited | ProviderError::ServerError(_) | ProviderError::Timeout { .. }
        )
    }
}

/// Errors from the tool surface. These are rendered into tool observations
/// for the agent rather than terminating the run.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Path {path} escapes the workspace root")]
    PermissionDenied { path: String },

    #[error("File already exists: {path}")]
    FileExists { path: PathBuf },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArgs { tool: &'static str, message: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Command rejected as dangerous: {0}")]
    DangerousCommand(String),

    #[error("Command timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Edit failed: {0}")]
    Edit(#[from] EditError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Closest-candidate details attached to an `EditError::Mismatch`.
///
/// The agent is expected to re-read the file and resend only the failing
/// edit; the candidate window tells it where the near-miss was.
#[derive(Debug, Clone)]
pub struct MismatchDetails {
    /// 1-based line where the closest candidate window starts.
    pub candidate_line: usize,
    /// The closest candidate window text, truncated.
    pub candidate_window: String,
    /// Names of the match layers that were attempted.
    pub layers_tried: Vec<&'static str>,
}

/// Errors from the search/replace editor.
#[derive(Debug, Error)]
pub enum EditError {
    #[error(
        "Search block not found in {path} (closest candidate at line {line}; tried layers: {layers}). \
         Re-read the file and resend only this edit.",
        path = .path.display(),
        line = .details.candidate_line,
        layers = .details.layers_tried.join(", ")
    )]
    Mismatch {
        path: PathBuf,
        details: MismatchDetails,
    },

    #[error("Search block matches {count} locations in {path}; make it unique", path = .path.display())]
    Ambiguous { path: PathBuf, count: usize },

    #[error("Empty search block for {path}", path = .path.display())]
    EmptySearch { path: PathBuf },

    #[error("I/O error editing {path}: {source}", path = .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Infrastructure failures inside an agent engine. Semantic problems become
/// blockers or a `RunOutcome::Failed`, never this.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Unknown engine: {0}")]
    UnknownEngine(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the batch conductor.
#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("Invalid dependency map: {0}")]
    InvalidDependencyMap(String),

    #[error("Workspace missing at {0}")]
    WorkspaceMissing(PathBuf),

    #[error("Task {task_id} does not belong to workspace {workspace_id}")]
    ForeignTask {
        task_id: String,
        workspace_id: String,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from checkpoint create/restore.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint {0} not found")]
    NotFound(String),

    #[error("Cannot restore while a batch is active")]
    BatchActive,

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Map an error chain to the CLI exit code contract:
/// 1 = user/state error, 2 = external failure.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(store) = cause.downcast_ref::<StoreError>() {
            return match store {
                StoreError::DatabaseLocked { .. } | StoreError::Sqlite(_) => 2,
                _ => 1,
            };
        }
        if cause.downcast_ref::<ProviderError>().is_some() {
            return 2;
        }
        if cause.downcast_ref::<git2::Error>().is_some() {
            return 2;
        }
        if let Some(conductor) = cause.downcast_ref::<ConductorError>() {
            return match conductor {
                ConductorError::InvalidDependencyMap(_)
                | ConductorError::WorkspaceMissing(_)
                | ConductorError::ForeignTask { .. } => 1,
                _ => 2,
            };
        }
        if cause.downcast_ref::<CheckpointError>().is_some() {
            return 1;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_invalid_transition_is_matchable() {
        let err = StoreError::InvalidTransition {
            from: "DONE".into(),
            to: "IN_PROGRESS".into(),
        };
        match &err {
            StoreError::InvalidTransition { from, to } => {
                assert_eq!(from, "DONE");
                assert_eq!(to, "IN_PROGRESS");
            }
            _ => panic!("Expected InvalidTransition"),
        }
        assert!(err.to_string().contains("DONE"));
    }

    #[test]
    fn provider_error_retryability() {
        assert!(ProviderError::RateLimited.is_retryable());
        assert!(ProviderError::ServerError("502".into()).is_retryable());
        assert!(ProviderError::Timeout { seconds: 120 }.is_retryable());
        assert!(!ProviderError::InvalidRequest("bad".into()).is_retryable());
        assert!(!ProviderError::ContextWindowExceeded.is_retryable());
    }

    #[test]
    fn edit_mismatch_message_names_candidate_line() {
        let err = EditError::Mismatch {
            path: PathBuf::from("src/a.py"),
            details: MismatchDetails {
                candidate_line: 42,
                candidate_window: "def handler():".into(),
                layers_tried: vec!["exact", "trailing-ws", "collapsed-ws", "indent"],
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("line 42"));
        assert!(msg.contains("indent"));
        assert!(msg.contains("resend only this edit"));
    }

    #[test]
    fn tool_error_dangerous_command_carries_reason() {
        let err = ToolError::DangerousCommand("rm -rf /".into());
        assert!(err.to_string().contains("rm -rf /"));
    }

    #[test]
    fn exit_codes_follow_taxonomy() {
        let user = anyhow::Error::new(StoreError::NotFound {
            entity: "task",
            id: "t1".into(),
        });
        assert_eq!(exit_code_for(&user), 1);

        let external = anyhow::Error::new(ProviderError::ServerError("500".into()));
        assert_eq!(exit_code_for(&external), 2);

        let cycle = anyhow::Error::new(ConductorError::InvalidDependencyMap("cycle".into()));
        assert_eq!(exit_code_for(&cycle), 1);
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&StoreError::DatabaseLocked { attempts: 5 });
        assert_std_error(&ProviderError::RateLimited);
        assert_std_error(&ToolError::UnknownTool("x".into()));
        assert_std_error(&AgentError::UnknownEngine("plan2".into()));
        assert_std_error(&ConductorError::InvalidDependencyMap("c".into()));
        assert_std_error(&CheckpointError::BatchActive);
    }
}
