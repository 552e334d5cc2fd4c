//! Single-task runtime facade.
//!
//! Glues task lifecycle, agent engine, gates and events together for one
//! run. Both the CLI (`work start`) and the batch conductor call through
//! here, so the bookkeeping — status transitions, run records, events,
//! cancellation — lives in exactly one place.

use crate::agent::{
    AgentConfig, AgentEngine, EngineDeps, PlanEngine, ReactEngine, RunHandle, RunOutcome,
    TaskContext,
};
use crate::blockers::BlockerService;
use crate::errors::AgentError;
use crate::events::EventType;
use crate::gates::GateSet;
use crate::provider::ChatProvider;
use crate::store::models::{EngineKind, Run, RunStatus, Task, TaskStatus};
use crate::tools::ToolRegistry;
use crate::workspace::Workspace;
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

const INVENTORY_CAP: usize = 500;
const PRD_EXCERPT_CHARS: usize = 2_000;

pub struct Runtime {
    pub workspace: Workspace,
    deps: EngineDeps,
    /// Live cancellation tokens by task id, for in-process `stop_run`.
    live: DashMap<String, CancellationToken>,
}

impl Runtime {
    pub fn new(
        workspace: Workspace,
        provider: Arc<dyn ChatProvider>,
        config: AgentConfig,
    ) -> Self {
        let blockers = BlockerService::new(workspace.store.clone(), workspace.events.clone());
        let deps = EngineDeps {
            provider,
            tools: ToolRegistry::standard(),
            gates: GateSet::standard(),
            blockers,
            config,
        };
        Self {
            workspace,
            deps,
            live: DashMap::new(),
        }
    }

    pub fn blockers(&self) -> &BlockerService {
        &self.deps.blockers
    }

    pub fn provider(&self) -> &dyn ChatProvider {
        self.deps.provider.as_ref()
    }

    pub fn gates(&self) -> &GateSet {
        &self.deps.gates
    }

    fn engine_for(&self, kind: EngineKind) -> Arc<dyn AgentEngine> {
        match kind {
            EngineKind::React => Arc::new(ReactEngine::new(self.deps.clone())),
            EngineKind::Plan => Arc::new(PlanEngine::new(self.deps.clone())),
        }
    }

    /// Execute one run of a task to its terminal state. The task must be
    /// READY (its dependencies DONE or MERGED). Returns the finished Run.
    pub async fn start_run(&self, task_id: &str, engine: EngineKind) -> Result<Run, AgentError> {
        let store = &self.workspace.store;
        let events = &self.workspace.events;

        let task = store.set_task_status(task_id, TaskStatus::InProgress)?;
        events.emit(
            EventType::TaskStatusChanged,
            task_id,
            serde_json::json!({ "to": "IN_PROGRESS" }),
        )?;

        let run = store.create_run(task_id, engine)?;
        events.emit(
            EventType::RunStarted,
            task_id,
            serde_json::json!({ "run_id": run.id, "engine": engine.as_str() }),
        )?;

        let cancel = CancellationToken::new();
        self.live.insert(task_id.to_string(), cancel.clone());
        let handle = RunHandle {
            run_id: run.id.clone(),
            store: store.clone(),
            events: events.clone(),
            cancel,
        };

        let ctx = self.load_context(&task)?;
        let result = self.engine_for(engine).run(&ctx, &handle).await;
        self.live.remove(task_id);

        let (outcome, stats) = match result {
            Ok(pair) => pair,
            Err(e) => {
                // Infrastructure failure: record it and terminate the run
                // as FAILED without losing the reason.
                tracing::error!(task_id, error = %e, "run failed with infrastructure error");
                let finished = store.finish_run(
                    &run.id,
                    RunStatus::Failed,
                    0,
                    &Default::default(),
                    None,
                    Some(&e.to_string()),
                )?;
                store.set_task_status(task_id, TaskStatus::Failed)?;
                events.emit(
                    EventType::TaskStatusChanged,
                    task_id,
                    serde_json::json!({ "to": "FAILED", "error": e.to_string() }),
                )?;
                return Ok(finished);
            }
        };

        let (run_status, task_status, summary, error) = match &outcome {
            RunOutcome::Completed { summary, .. } => (
                RunStatus::Completed,
                TaskStatus::Done,
                Some(summary.clone()),
                None,
            ),
            RunOutcome::Blocked { blocker } => (
                RunStatus::Blocked,
                TaskStatus::Blocked,
                None,
                Some(format!("blocked on {}", blocker.id)),
            ),
            RunOutcome::Failed { reason } if outcome.is_cancelled() => (
                RunStatus::Stopped,
                TaskStatus::Failed,
                None,
                Some(reason.clone()),
            ),
            RunOutcome::Failed { reason } => (
                RunStatus::Failed,
                TaskStatus::Failed,
                None,
                Some(reason.clone()),
            ),
        };

        let finished = store.finish_run(
            &run.id,
            run_status,
            stats.iterations,
            &stats.usage,
            summary.as_deref(),
            error.as_deref(),
        )?;
        if let Some(summary) = &summary {
            store.set_task_result(task_id, summary)?;
        }
        store.set_task_status(task_id, task_status)?;
        events.emit(
            EventType::TaskStatusChanged,
            task_id,
            serde_json::json!({ "to": task_status.as_str() }),
        )?;

        Ok(finished)
    }

    /// Cooperative cancellation: flips the in-process token when the run is
    /// in this process, and always sets the durable flag for runs owned by
    /// another process. Returns whether any RUNNING run was found.
    pub fn stop_run(&self, task_id: &str) -> Result<bool, AgentError> {
        if let Some(entry) = self.live.get(task_id) {
            entry.value().cancel();
        }
        Ok(self.workspace.store.request_run_cancel(task_id)?)
    }

    /// Resume a BLOCKED task whose blockers have all been answered or
    /// resolved. Re-enters IN_PROGRESS with the answers in context.
    pub async fn resume_run(&self, task_id: &str, engine: EngineKind) -> Result<Run, AgentError> {
        let store = &self.workspace.store;
        let task = store.get_task(task_id)?;

        if task.status == TaskStatus::Blocked {
            let blocking = store
                .list_blockers_for_task(task_id)?
                .iter()
                .any(|b| b.status.is_blocking());
            if blocking {
                return Err(AgentError::Other(anyhow::anyhow!(
                    "task {task_id} still has open blockers; answer them first"
                )));
            }
            store.set_task_status(task_id, TaskStatus::Ready)?;
        } else if task.status != TaskStatus::Ready {
            return Err(AgentError::Other(anyhow::anyhow!(
                "task {task_id} is {} and cannot be resumed",
                task.status
            )));
        }

        self.start_run(task_id, engine).await
    }

    /// Assemble the agent's context: project preferences, file inventory,
    /// PRD excerpt, answered blockers.
    fn load_context(&self, task: &Task) -> Result<TaskContext, AgentError> {
        let mut inventory: Vec<String> = WalkDir::new(&self.workspace.root)
            .into_iter()
            .filter_entry(|e| !crate::tools::is_ignored_path(e.path()))
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .take(INVENTORY_CAP)
            .map(|e| {
                e.path()
                    .strip_prefix(&self.workspace.root)
                    .unwrap_or(e.path())
                    .to_string_lossy()
                    .to_string()
            })
            .collect();
        inventory.sort();

        let prd_excerpt = self
            .workspace
            .store
            .latest_prd(self.workspace.id())?
            .map(|prd| crate::util::truncate_chars(&prd.content, PRD_EXCERPT_CHARS));

        let answered_blockers = self.deps.blockers.answered_for_task(&task.id)?;

        Ok(TaskContext {
            task: task.clone(),
            workspace: self.workspace.clone(),
            file_inventory: inventory,
            prd_excerpt,
            answered_blockers,
            plan: None,
        })
    }
}
