//! Entity types persisted by the state store.
//!
//! Status enums serialize as SCREAMING_SNAKE text, matching the CHECK
//! constraints in the schema. Identifiers are opaque strings; timestamps are
//! fixed-width ISO-8601 UTC strings (see `util::now_iso`).

use crate::errors::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Root record for a registered target repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    pub id: String,
    pub repo_path: String,
    pub created_at: String,
}

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Backlog,
    Ready,
    InProgress,
    Blocked,
    Done,
    Failed,
    Merged,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Backlog,
        TaskStatus::Ready,
        TaskStatus::InProgress,
        TaskStatus::Blocked,
        TaskStatus::Done,
        TaskStatus::Failed,
        TaskStatus::Merged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Backlog => "BACKLOG",
            TaskStatus::Ready => "READY",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Blocked => "BLOCKED",
            TaskStatus::Done => "DONE",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Merged => "MERGED",
        }
    }

    /// States in which `completed_at` must be set.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed | TaskStatus::Merged)
    }

    /// States that satisfy a dependent task's `depends_on` entry.
    pub fn satisfies_dependency(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Merged)
    }

    /// The allowed transition table. Everything else is `InvalidTransition`.
    pub fn can_transition(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Backlog, Ready)
                | (Ready, Backlog)
                | (Ready, InProgress)
                // A READY task with an unsatisfiable dependency is parked
                // BLOCKED by the conductor's deadlock guard.
                | (Ready, Blocked)
                | (InProgress, Blocked)
                | (InProgress, Done)
                | (InProgress, Failed)
                | (Blocked, Ready)
                | (Failed, Ready)
                | (Done, Merged)
        )
    }

    /// Validate a transition, producing the store's typed error on refusal.
    pub fn check_transition(&self, to: TaskStatus) -> Result<(), StoreError> {
        if *self == to || self.can_transition(to) {
            Ok(())
        } else {
            Err(StoreError::InvalidTransition {
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BACKLOG" => Ok(TaskStatus::Backlog),
            "READY" => Ok(TaskStatus::Ready),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "BLOCKED" => Ok(TaskStatus::Blocked),
            "DONE" => Ok(TaskStatus::Done),
            "FAILED" => Ok(TaskStatus::Failed),
            "MERGED" => Ok(TaskStatus::Merged),
            other => Err(StoreError::Integrity(format!("unknown task status '{other}'"))),
        }
    }
}

/// A unit of agent work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub workspace_id: String,
    /// Per-workspace monotonic number, unique within the workspace.
    pub task_number: i64,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: i64,
    pub depends_on: Vec<String>,
    /// 1-5; defaulted to 2 when the generator gives none.
    pub complexity: u8,
    pub assignee_hint: Option<String>,
    pub result_summary: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

/// Agent engine selector for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    React,
    Plan,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::React => "react",
            EngineKind::Plan => "plan",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "react" => Ok(EngineKind::React),
            "plan" => Ok(EngineKind::Plan),
            other => Err(StoreError::Integrity(format!("unknown engine '{other}'"))),
        }
    }
}

/// Run lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Stopped,
    Blocked,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Stopped => "STOPPED",
            RunStatus::Blocked => "BLOCKED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "RUNNING" => Ok(RunStatus::Running),
            "COMPLETED" => Ok(RunStatus::Completed),
            "FAILED" => Ok(RunStatus::Failed),
            "STOPPED" => Ok(RunStatus::Stopped),
            "BLOCKED" => Ok(RunStatus::Blocked),
            other => Err(StoreError::Integrity(format!("unknown run status '{other}'"))),
        }
    }
}

/// Token usage for one provider call, aggregated per run and per batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// One execution attempt of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub task_id: String,
    pub engine: EngineKind,
    pub status: RunStatus,
    pub iterations: u32,
    pub usage: TokenUsage,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub summary: Option<String>,
    pub last_error: Option<String>,
    /// Durable cooperative-cancel flag, observed between agent iterations.
    pub cancel_requested: bool,
}

/// SYNC blockers halt the run; ASYNC blockers annotate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockerMode {
    Sync,
    Async,
}

impl BlockerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockerMode::Sync => "SYNC",
            BlockerMode::Async => "ASYNC",
        }
    }
}

impl FromStr for BlockerMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SYNC" => Ok(BlockerMode::Sync),
            "ASYNC" => Ok(BlockerMode::Async),
            other => Err(StoreError::Integrity(format!("unknown blocker mode '{other}'"))),
        }
    }
}

/// Why the agent is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockerCategory {
    MissingInfo,
    AmbiguousSpec,
    ExternalDependency,
    TacticalDecision,
    Escalation,
}

impl BlockerCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockerCategory::MissingInfo => "missing-info",
            BlockerCategory::AmbiguousSpec => "ambiguous-spec",
            BlockerCategory::ExternalDependency => "external-dependency",
            BlockerCategory::TacticalDecision => "tactical-decision",
            BlockerCategory::Escalation => "escalation",
        }
    }
}

impl FromStr for BlockerCategory {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "missing-info" => Ok(BlockerCategory::MissingInfo),
            "ambiguous-spec" => Ok(BlockerCategory::AmbiguousSpec),
            "external-dependency" => Ok(BlockerCategory::ExternalDependency),
            "tactical-decision" => Ok(BlockerCategory::TacticalDecision),
            "escalation" => Ok(BlockerCategory::Escalation),
            other => Err(StoreError::Integrity(format!("unknown blocker category '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockerStatus {
    Open,
    Answered,
    Resolved,
    Expired,
}

impl BlockerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockerStatus::Open => "OPEN",
            BlockerStatus::Answered => "ANSWERED",
            BlockerStatus::Resolved => "RESOLVED",
            BlockerStatus::Expired => "EXPIRED",
        }
    }

    /// Whether this blocker still holds its task in BLOCKED.
    pub fn is_blocking(&self) -> bool {
        matches!(self, BlockerStatus::Open)
    }
}

impl FromStr for BlockerStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "OPEN" => Ok(BlockerStatus::Open),
            "ANSWERED" => Ok(BlockerStatus::Answered),
            "RESOLVED" => Ok(BlockerStatus::Resolved),
            "EXPIRED" => Ok(BlockerStatus::Expired),
            other => Err(StoreError::Integrity(format!("unknown blocker status '{other}'"))),
        }
    }
}

/// Open question from the agent to a human.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blocker {
    pub id: String,
    pub task_id: String,
    pub mode: BlockerMode,
    pub question: String,
    pub context: String,
    pub category: BlockerCategory,
    pub status: BlockerStatus,
    pub answer: Option<String>,
    pub created_at: String,
    pub answered_at: Option<String>,
    pub expires_at: String,
}

/// Batch scheduling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStrategy {
    Serial,
    Parallel,
    Auto,
}

impl BatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStrategy::Serial => "SERIAL",
            BatchStrategy::Parallel => "PARALLEL",
            BatchStrategy::Auto => "AUTO",
        }
    }
}

impl FromStr for BatchStrategy {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SERIAL" => Ok(BatchStrategy::Serial),
            "PARALLEL" => Ok(BatchStrategy::Parallel),
            "AUTO" => Ok(BatchStrategy::Auto),
            other => Err(StoreError::Integrity(format!("unknown strategy '{other}'"))),
        }
    }
}

/// What to do when a task in the batch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnFailure {
    Continue,
    Stop,
}

impl OnFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnFailure::Continue => "CONTINUE",
            OnFailure::Stop => "STOP",
        }
    }
}

impl FromStr for OnFailure {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CONTINUE" => Ok(OnFailure::Continue),
            "STOP" => Ok(OnFailure::Stop),
            other => Err(StoreError::Integrity(format!("unknown on-failure '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Partial,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "PENDING",
            BatchStatus::Running => "RUNNING",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Partial => "PARTIAL",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchStatus::Pending | BatchStatus::Running)
    }
}

impl FromStr for BatchStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(BatchStatus::Pending),
            "RUNNING" => Ok(BatchStatus::Running),
            "COMPLETED" => Ok(BatchStatus::Completed),
            "PARTIAL" => Ok(BatchStatus::Partial),
            "FAILED" => Ok(BatchStatus::Failed),
            "CANCELLED" => Ok(BatchStatus::Cancelled),
            other => Err(StoreError::Integrity(format!("unknown batch status '{other}'"))),
        }
    }
}

/// A scheduled group of tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub workspace_id: String,
    /// Ordered input list.
    pub task_ids: Vec<String>,
    pub strategy: BatchStrategy,
    pub max_parallel: usize,
    pub on_failure: OnFailure,
    pub retry_budget: u32,
    pub status: BatchStatus,
    /// task-id -> dependency ids. Empty when none inferred.
    pub dependency_map: BTreeMap<String, Vec<String>>,
    /// task-id -> terminal run status of its last attempt.
    pub results: BTreeMap<String, RunStatus>,
    pub usage: TokenUsage,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

/// One version of a product requirements document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prd {
    pub id: String,
    pub workspace_id: String,
    pub content: String,
    /// Monotonic within the chain, starting at 1.
    pub version: i64,
    pub parent_id: Option<String>,
    pub chain_id: String,
    pub change_summary: Option<String>,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_accepts_legal_moves() {
        use TaskStatus::*;
        assert!(Backlog.can_transition(Ready));
        assert!(Ready.can_transition(Backlog));
        assert!(Ready.can_transition(InProgress));
        assert!(InProgress.can_transition(Blocked));
        assert!(InProgress.can_transition(Done));
        assert!(InProgress.can_transition(Failed));
        assert!(Blocked.can_transition(Ready));
        assert!(Failed.can_transition(Ready));
        assert!(Done.can_transition(Merged));
    }

    #[test]
    fn transition_table_rejects_illegal_moves() {
        use TaskStatus::*;
        assert!(!Backlog.can_transition(InProgress));
        assert!(!Backlog.can_transition(Done));
        assert!(!Done.can_transition(Ready));
        assert!(!Merged.can_transition(Done));
        assert!(Ready.can_transition(Blocked));
        assert!(!Blocked.can_transition(InProgress));
        assert!(!Failed.can_transition(InProgress));
    }

    #[test]
    fn check_transition_is_idempotent_on_same_status() {
        assert!(TaskStatus::Ready.check_transition(TaskStatus::Ready).is_ok());
    }

    #[test]
    fn check_transition_yields_typed_error() {
        let err = TaskStatus::Done
            .check_transition(TaskStatus::InProgress)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[test]
    fn terminal_statuses_match_completed_at_invariant() {
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Merged.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(!TaskStatus::Blocked.is_terminal());
    }

    #[test]
    fn dependency_satisfaction_requires_done_or_merged() {
        assert!(TaskStatus::Done.satisfies_dependency());
        assert!(TaskStatus::Merged.satisfies_dependency());
        assert!(!TaskStatus::Failed.satisfies_dependency());
        assert!(!TaskStatus::Ready.satisfies_dependency());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert_eq!("sync".parse::<BlockerMode>().unwrap(), BlockerMode::Sync);
        assert_eq!(
            "tactical-decision".parse::<BlockerCategory>().unwrap(),
            BlockerCategory::TacticalDecision
        );
        assert_eq!("auto".parse::<BatchStrategy>().unwrap(), BatchStrategy::Auto);
    }

    #[test]
    fn token_usage_accumulates() {
        let mut total = TokenUsage::default();
        total.add(&TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
        });
        total.add(&TokenUsage {
            input_tokens: 1,
            output_tokens: 2,
            total_tokens: 3,
        });
        assert_eq!(total.total_tokens, 18);
        assert_eq!(total.input_tokens, 11);
    }
}
