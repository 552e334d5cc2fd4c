//! Agent engines: the ReAct loop (default) and the legacy plan-then-execute
//! wrapper, behind one capability trait the runtime selects by name.

mod compaction;
mod fixer;
mod plan;
mod prompt;
mod react;

pub use compaction::{CompactionOutcome, Compactor};
pub use fixer::{FinalVerdict, FixTracker};
pub use plan::PlanEngine;
pub use react::ReactEngine;

use crate::blockers::BlockerService;
use crate::errors::AgentError;
use crate::events::EventLog;
use crate::gates::GateSet;
use crate::provider::ChatProvider;
use crate::store::StateStore;
use crate::store::models::{Blocker, Task, TokenUsage};
use crate::tools::ToolRegistry;
use crate::workspace::Workspace;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Terminal outcome of one run.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed {
        summary: String,
        files_modified: Vec<String>,
    },
    Failed {
        reason: String,
    },
    Blocked {
        blocker: Blocker,
    },
}

impl RunOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        RunOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunOutcome::Failed { reason } if reason == "cancelled")
    }
}

/// Everything an engine needs to know about the task it is executing.
#[derive(Clone)]
pub struct TaskContext {
    pub task: Task,
    pub workspace: Workspace,
    /// Capped, sorted file inventory for the prompt.
    pub file_inventory: Vec<String>,
    pub prd_excerpt: Option<String>,
    pub answered_blockers: Vec<Blocker>,
    /// Upfront plan, set only by the plan engine.
    pub plan: Option<String>,
}

/// Per-run wiring handed to the engine by the runtime.
#[derive(Clone)]
pub struct RunHandle {
    pub run_id: String,
    pub store: Arc<StateStore>,
    pub events: EventLog,
    pub cancel: CancellationToken,
}

impl RunHandle {
    /// Cooperative-cancel check, consulted at every suspension point. Both
    /// the in-process token and the durable flag on the run row count.
    pub fn is_cancelled(&self) -> bool {
        if self.cancel.is_cancelled() {
            return true;
        }
        self.store
            .run_cancel_requested(&self.run_id)
            .unwrap_or(false)
    }
}

/// What an engine reports back beyond the outcome itself.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub iterations: u32,
    pub usage: TokenUsage,
}

/// The agent-engine capability the runtime depends on.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        ctx: &TaskContext,
        handle: &RunHandle,
    ) -> Result<(RunOutcome, RunStats), AgentError>;
}

/// Tunables for the ReAct engine and its fix sub-loop.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Iteration budget: base + step * (complexity - 1), clamped.
    pub base_iterations: u32,
    pub iteration_step: u32,
    pub min_iterations: u32,
    pub max_iterations: u32,
    /// Most recent iterations compaction must keep verbatim.
    pub recent_keep: usize,
    /// Final-verification fix attempts.
    pub max_fix_retries: u32,
    /// Provider turns per fix attempt.
    pub fix_turns: u32,
    /// Soft token budget per run; exceeding it raises an escalation blocker.
    pub token_budget: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_iterations: 15,
            iteration_step: 7,
            min_iterations: 15,
            max_iterations: 45,
            recent_keep: 8,
            max_fix_retries: 5,
            fix_turns: 5,
            token_budget: None,
        }
    }
}

impl AgentConfig {
    /// Adaptive budget from the task's complexity score (1-5, default 2).
    pub fn iteration_budget(&self, complexity: u8) -> u32 {
        let complexity = complexity.clamp(1, 5) as u32;
        (self.base_iterations + self.iteration_step * (complexity - 1))
            .clamp(self.min_iterations, self.max_iterations)
    }
}

/// Shared constructor bundle for engines.
#[derive(Clone)]
pub struct EngineDeps {
    pub provider: Arc<dyn ChatProvider>,
    pub tools: ToolRegistry,
    pub gates: GateSet,
    pub blockers: BlockerService,
    pub config: AgentConfig,
}
