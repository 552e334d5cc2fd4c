//! Batch conductor: runs many tasks concurrently under a dependency DAG
//! with a bounded worker pool, retries, resume, cancellation, and
//! supervisor auto-resolution of tactical blockers.

mod dag;
mod infer;
mod supervisor;

pub use dag::DependencyDag;
pub use infer::infer_dependency_map;
pub use supervisor::{Supervisor, canonical_kind};

use crate::errors::ConductorError;
use crate::events::EventType;
use crate::runtime::Runtime;
use crate::store::batches::NewBatch;
use crate::store::models::{
    Batch, BatchStatus, BatchStrategy, BlockerCategory, BlockerMode, EngineKind, OnFailure,
    RunStatus, TaskStatus, TokenUsage,
};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub struct Conductor {
    runtime: Arc<Runtime>,
    supervisor: Supervisor,
    /// Live batch cancellation tokens, for in-process `cancel_batch`.
    cancels: DashMap<String, CancellationToken>,
}

impl Conductor {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        let supervisor = Supervisor::new(
            runtime.workspace.store.clone(),
            runtime.blockers().clone(),
        );
        Self {
            runtime,
            supervisor,
            cancels: DashMap::new(),
        }
    }

    /// Create and execute a batch to its terminal status.
    pub async fn run_batch(&self, new: &NewBatch) -> Result<Batch, ConductorError> {
        let workspace = &self.runtime.workspace;
        let batch = workspace.store.create_batch(workspace.id(), new)?;
        self.execute(batch, None).await
    }

    /// Re-execute the failed/blocked subset of a finished batch (or every
    /// task with `force`), preserving completed results.
    pub async fn resume_batch(&self, batch_id: &str, force: bool) -> Result<Batch, ConductorError> {
        let batch = self.runtime.workspace.store.get_batch(batch_id)?;
        let rerun: Vec<String> = batch
            .task_ids
            .iter()
            .filter(|id| {
                force
                    || !matches!(
                        batch.results.get(*id),
                        Some(RunStatus::Completed)
                    )
            })
            .cloned()
            .collect();
        self.execute(batch, Some(rerun)).await
    }

    /// Signal cooperative cancellation. In-process batches stop at their
    /// workers' next suspension point; for a batch owned by another process
    /// the durable per-run flags are set instead.
    pub fn cancel_batch(&self, batch_id: &str) -> Result<bool, ConductorError> {
        if let Some(entry) = self.cancels.get(batch_id) {
            entry.value().cancel();
            return Ok(true);
        }
        let batch = self.runtime.workspace.store.get_batch(batch_id)?;
        let mut any = false;
        for task_id in &batch.task_ids {
            any |= self.runtime.workspace.store.request_run_cancel(task_id)?;
        }
        Ok(any)
    }

    /// Cancel every batch this conductor is currently running (Ctrl-C
    /// path). Live workers stop at their next suspension point.
    pub fn cancel_all(&self) {
        for entry in self.cancels.iter() {
            entry.value().cancel();
        }
    }

    /// Waves display for `--dry-run`: what would run in parallel.
    pub async fn plan_waves(&self, new: &NewBatch) -> Result<Vec<Vec<String>>, ConductorError> {
        let dag = self.resolve_dag(new.strategy, &new.task_ids, &mut TokenUsage::default()).await?;
        Ok(dag.waves())
    }

    async fn execute(
        &self,
        batch: Batch,
        rerun: Option<Vec<String>>,
    ) -> Result<Batch, ConductorError> {
        let cancel = CancellationToken::new();
        self.cancels.insert(batch.id.clone(), cancel.clone());
        let result = self.execute_inner(batch.clone(), rerun, cancel).await;
        self.cancels.remove(&batch.id);
        result
    }

    async fn execute_inner(
        &self,
        batch: Batch,
        rerun: Option<Vec<String>>,
        cancel: CancellationToken,
    ) -> Result<Batch, ConductorError> {
        let store = &self.runtime.workspace.store;
        let events = &self.runtime.workspace.events;
        let mut usage = batch.usage;

        let dag = self
            .resolve_dag(batch.strategy, &batch.task_ids, &mut usage)
            .await?;
        if batch.strategy == BatchStrategy::Auto {
            store.save_batch_dependency_map(&batch.id, dag.dependency_map())?;
        }

        store.mark_batch_started(&batch.id)?;
        events.emit(
            EventType::BatchStarted,
            &batch.id,
            serde_json::json!({
                "strategy": batch.strategy.as_str(),
                "tasks": batch.task_ids.len(),
                "max_parallel": batch.max_parallel,
            }),
        )?;

        let max_parallel = match batch.strategy {
            BatchStrategy::Serial => 1,
            _ => batch.max_parallel.max(1),
        };

        let mut results: BTreeMap<String, RunStatus> = batch.results.clone();
        let to_run = rerun.unwrap_or_else(|| batch.task_ids.clone());

        self.schedule_pass(
            &batch, &dag, to_run, max_parallel, &cancel, &mut results, &mut usage,
        )
        .await?;

        // Retry pass over FAILED tasks only; BLOCKED needs a human.
        for attempt in 1..=batch.retry_budget {
            if cancel.is_cancelled() {
                break;
            }
            let failed: Vec<String> = batch
                .task_ids
                .iter()
                .filter(|id| matches!(results.get(*id), Some(RunStatus::Failed)))
                .cloned()
                .collect();
            if failed.is_empty() {
                break;
            }
            tracing::info!(batch_id = %batch.id, attempt, retrying = failed.len(), "batch retry pass");
            self.schedule_pass(
                &batch, &dag, failed, max_parallel, &cancel, &mut results, &mut usage,
            )
            .await?;
        }

        let status = final_status(&batch.task_ids, &results, cancel.is_cancelled());
        store.save_batch_results(&batch.id, status, &results, &usage, true)?;
        events.emit(
            if status == BatchStatus::Cancelled {
                EventType::BatchCancelled
            } else {
                EventType::BatchCompleted
            },
            &batch.id,
            serde_json::json!({
                "status": status.as_str(),
                "succeeded": results.values().filter(|s| s.is_success()).count(),
                "total": batch.task_ids.len(),
            }),
        )?;

        Ok(store.get_batch(&batch.id)?)
    }

    async fn resolve_dag(
        &self,
        strategy: BatchStrategy,
        task_ids: &[String],
        usage: &mut TokenUsage,
    ) -> Result<DependencyDag, ConductorError> {
        let store = &self.runtime.workspace.store;
        match strategy {
            // SERIAL ignores dependencies entirely: submitted order, one at
            // a time.
            BatchStrategy::Serial => Ok(DependencyDag::unconstrained(task_ids)),
            BatchStrategy::Parallel => {
                let members: HashSet<&String> = task_ids.iter().collect();
                let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
                for task_id in task_ids {
                    let task = store.get_task(task_id)?;
                    map.insert(
                        task_id.clone(),
                        task.depends_on
                            .into_iter()
                            .filter(|d| members.contains(d))
                            .collect(),
                    );
                }
                DependencyDag::build(task_ids, &map)
            }
            BatchStrategy::Auto => {
                let tasks = task_ids
                    .iter()
                    .map(|id| store.get_task(id))
                    .collect::<Result<Vec<_>, _>>()?;
                let (map, inference_usage) = infer_dependency_map(
                    self.runtime.provider(),
                    &tasks,
                    &CancellationToken::new(),
                )
                .await?;
                usage.add(&inference_usage);
                DependencyDag::build(task_ids, &map)
            }
        }
    }

    /// One scheduling pass: fill the worker pool from the ready set until
    /// every requested task is terminal or unreachable.
    #[allow(clippy::too_many_arguments)]
    async fn schedule_pass(
        &self,
        batch: &Batch,
        dag: &DependencyDag,
        to_run: Vec<String>,
        max_parallel: usize,
        cancel: &CancellationToken,
        results: &mut BTreeMap<String, RunStatus>,
        usage: &mut TokenUsage,
    ) -> Result<(), ConductorError> {
        let store = &self.runtime.workspace.store;
        let events = &self.runtime.workspace.events;

        let mut pending = to_run;
        // Dependencies satisfied by earlier passes or work outside this
        // batch count too.
        let mut satisfied: HashSet<String> = HashSet::new();
        for task_id in &batch.task_ids {
            if store.get_task(task_id)?.status.satisfies_dependency() {
                satisfied.insert(task_id.clone());
            }
        }

        let mut in_flight: JoinSet<(String, Result<crate::store::models::Run, crate::errors::AgentError>)> =
            JoinSet::new();
        let mut live_ids: HashSet<String> = HashSet::new();
        let mut halted = false;
        let mut cancel_propagated = false;

        loop {
            if cancel.is_cancelled() && !cancel_propagated {
                cancel_propagated = true;
                halted = true;
                for task_id in &live_ids {
                    let _ = self.runtime.stop_run(task_id);
                }
            }

            if !halted {
                let ready: Vec<String> = dag
                    .ready(&pending, &satisfied)
                    .into_iter()
                    .cloned()
                    .collect();
                for task_id in ready {
                    if in_flight.len() >= max_parallel {
                        break;
                    }
                    pending.retain(|t| t != &task_id);

                    let task = store.get_task(&task_id)?;
                    match task.status {
                        // Already-DONE tasks are a no-op: no new Run.
                        TaskStatus::Done | TaskStatus::Merged => {
                            results.insert(task_id.clone(), RunStatus::Completed);
                            satisfied.insert(task_id.clone());
                            events.emit(
                                EventType::BatchTaskCompleted,
                                &batch.id,
                                serde_json::json!({ "task_id": task_id, "skipped": "already done" }),
                            )?;
                            continue;
                        }
                        TaskStatus::Blocked => {
                            results.insert(task_id.clone(), RunStatus::Blocked);
                            events.emit(
                                EventType::BatchTaskFailed,
                                &batch.id,
                                serde_json::json!({ "task_id": task_id, "reason": "blocked, needs answer" }),
                            )?;
                            continue;
                        }
                        TaskStatus::Backlog | TaskStatus::Failed => {
                            store.set_task_status(&task_id, TaskStatus::Ready)?;
                        }
                        TaskStatus::Ready => {}
                        TaskStatus::InProgress => {
                            tracing::warn!(task_id, "task already in progress, skipping");
                            results.insert(task_id.clone(), RunStatus::Failed);
                            continue;
                        }
                    }

                    events.emit(
                        EventType::BatchTaskStarted,
                        &batch.id,
                        serde_json::json!({ "task_id": task_id }),
                    )?;
                    live_ids.insert(task_id.clone());
                    let runtime = self.runtime.clone();
                    in_flight.spawn(async move {
                        let run = runtime.start_run(&task_id, EngineKind::React).await;
                        (task_id, run)
                    });
                }
            }

            if in_flight.is_empty() {
                if halted || pending.is_empty() {
                    break;
                }
                // Deadlock guard: nothing running, nothing ready, tasks
                // remain. Their dependencies can never be satisfied.
                for task_id in std::mem::take(&mut pending) {
                    tracing::warn!(task_id, "unsatisfiable dependency, parking task");
                    self.runtime.blockers().create(
                        &task_id,
                        BlockerMode::Sync,
                        "This task's dependencies failed or can never complete. How should it proceed?",
                        "unsatisfiable dependency",
                        BlockerCategory::ExternalDependency,
                    )?;
                    store.set_task_status(&task_id, TaskStatus::Blocked)?;
                    results.insert(task_id.clone(), RunStatus::Blocked);
                    events.emit(
                        EventType::BatchTaskFailed,
                        &batch.id,
                        serde_json::json!({ "task_id": task_id, "reason": "unsatisfiable dependency" }),
                    )?;
                }
                break;
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let (task_id, run_result) = joined.map_err(|e| ConductorError::Other(e.into()))?;
            live_ids.remove(&task_id);

            match run_result {
                Ok(run) => {
                    usage.add(&run.usage);
                    results.insert(task_id.clone(), run.status);
                    match run.status {
                        RunStatus::Completed => {
                            satisfied.insert(task_id.clone());
                            events.emit(
                                EventType::BatchTaskCompleted,
                                &batch.id,
                                serde_json::json!({ "task_id": task_id, "run_id": run.id }),
                            )?;
                        }
                        RunStatus::Blocked => {
                            events.emit(
                                EventType::BatchTaskFailed,
                                &batch.id,
                                serde_json::json!({ "task_id": task_id, "run_id": run.id, "status": "BLOCKED" }),
                            )?;
                            if self.try_supervisor_requeue(&task_id)? {
                                results.remove(&task_id);
                                pending.push(task_id);
                            }
                        }
                        status => {
                            events.emit(
                                EventType::BatchTaskFailed,
                                &batch.id,
                                serde_json::json!({ "task_id": task_id, "run_id": run.id, "status": status.as_str() }),
                            )?;
                            if batch.on_failure == OnFailure::Stop {
                                halted = true;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(task_id, error = %e, "worker failed");
                    results.insert(task_id.clone(), RunStatus::Failed);
                    events.emit(
                        EventType::BatchTaskFailed,
                        &batch.id,
                        serde_json::json!({ "task_id": task_id, "error": e.to_string() }),
                    )?;
                    if batch.on_failure == OnFailure::Stop {
                        halted = true;
                    }
                }
            }
        }

        Ok(())
    }

    /// On BLOCKER_CREATED for a tactical question, the supervisor may
    /// answer from its durable decision cache. Returns true when the task
    /// was unblocked and should be re-queued.
    fn try_supervisor_requeue(&self, task_id: &str) -> Result<bool, ConductorError> {
        let store = &self.runtime.workspace.store;
        let workspace_id = self.runtime.workspace.id().to_string();
        for blocker in store.list_blockers_for_task(task_id)? {
            if blocker.status.is_blocking() {
                self.supervisor.try_auto_resolve(&workspace_id, &blocker)?;
            }
        }
        Ok(store.get_task(task_id)?.status == TaskStatus::Ready)
    }
}

/// Terminal batch status. Cancellation wins; otherwise COMPLETED iff every
/// task succeeded, PARTIAL iff some did, FAILED iff none did.
fn final_status(
    task_ids: &[String],
    results: &BTreeMap<String, RunStatus>,
    cancelled: bool,
) -> BatchStatus {
    if cancelled {
        return BatchStatus::Cancelled;
    }
    let succeeded = task_ids
        .iter()
        .filter(|id| results.get(*id).map(|s| s.is_success()).unwrap_or(false))
        .count();
    if succeeded == task_ids.len() {
        BatchStatus::Completed
    } else if succeeded > 0 {
        BatchStatus::Partial
    } else {
        BatchStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentConfig;
    use crate::errors::ProviderError;
    use crate::provider::mock::{ScriptedProvider, ScriptedReply};
    use crate::store::tasks::NewTask;
    use crate::workspace::Workspace;
    use tempfile::TempDir;

    fn fixture(provider: ScriptedProvider, titles: &[&str]) -> (TempDir, Conductor, Vec<String>) {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::init(dir.path()).unwrap();
        let ids: Vec<String> = titles
            .iter()
            .map(|title| {
                let task = workspace
                    .store
                    .create_task(
                        workspace.id(),
                        &NewTask {
                            title: title.to_string(),
                            ..Default::default()
                        },
                    )
                    .unwrap();
                workspace
                    .store
                    .set_task_status(&task.id, TaskStatus::Ready)
                    .unwrap();
                task.id
            })
            .collect();
        let runtime = Arc::new(Runtime::new(
            workspace,
            Arc::new(provider),
            AgentConfig::default(),
        ));
        (dir, Conductor::new(runtime), ids)
    }

    fn new_batch(ids: &[String], strategy: BatchStrategy) -> NewBatch {
        NewBatch {
            task_ids: ids.to_vec(),
            strategy,
            max_parallel: 4,
            on_failure: OnFailure::Continue,
            retry_budget: 0,
        }
    }

    #[tokio::test]
    async fn serial_happy_path_completes_all_tasks() {
        // Exhausted scripts answer with a terminal text, so every task
        // completes in one iteration.
        let (_dir, conductor, ids) = fixture(ScriptedProvider::new(), &["a", "b", "c"]);
        let batch = conductor
            .run_batch(&new_batch(&ids, BatchStrategy::Serial))
            .await
            .unwrap();

        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.results.len(), 3);
        assert!(batch.results.values().all(|s| s.is_success()));

        let workspace = &conductor.runtime.workspace;
        for id in &ids {
            assert_eq!(workspace.store.get_task(id).unwrap().status, TaskStatus::Done);
        }
        let types: Vec<_> = workspace
            .events
            .tail(0)
            .unwrap()
            .iter()
            .map(|e| e.event_type)
            .collect();
        assert!(types.contains(&EventType::BatchStarted));
        assert!(types.contains(&EventType::BatchTaskStarted));
        assert!(types.contains(&EventType::BatchCompleted));
        assert_eq!(
            types.iter().filter(|t| **t == EventType::BatchTaskCompleted).count(),
            3
        );
    }

    #[tokio::test]
    async fn failure_with_continue_yields_partial() {
        let provider = ScriptedProvider::new()
            .push(ScriptedReply::Error(ProviderError::InvalidRequest("bad".into())));
        let (_dir, conductor, ids) = fixture(provider, &["fails", "works"]);

        let batch = conductor
            .run_batch(&new_batch(&ids, BatchStrategy::Serial))
            .await
            .unwrap();
        assert_eq!(batch.status, BatchStatus::Partial);
        assert_eq!(batch.results[&ids[0]], RunStatus::Failed);
        assert_eq!(batch.results[&ids[1]], RunStatus::Completed);
    }

    #[tokio::test]
    async fn stop_on_failure_halts_scheduling() {
        let provider = ScriptedProvider::new()
            .push(ScriptedReply::Error(ProviderError::InvalidRequest("bad".into())));
        let (_dir, conductor, ids) = fixture(provider, &["fails", "never-runs"]);

        let mut spec = new_batch(&ids, BatchStrategy::Serial);
        spec.on_failure = OnFailure::Stop;
        let batch = conductor.run_batch(&spec).await.unwrap();

        assert_eq!(batch.status, BatchStatus::Failed);
        assert!(!batch.results.contains_key(&ids[1]));
        let second = conductor.runtime.workspace.store.get_task(&ids[1]).unwrap();
        assert_eq!(second.status, TaskStatus::Ready);
    }

    #[tokio::test]
    async fn retry_budget_reruns_failed_tasks() {
        let provider = ScriptedProvider::new()
            .push(ScriptedReply::Error(ProviderError::InvalidRequest("flaky".into())));
        let (_dir, conductor, ids) = fixture(provider, &["flaky"]);

        let mut spec = new_batch(&ids, BatchStrategy::Serial);
        spec.retry_budget = 1;
        let batch = conductor.run_batch(&spec).await.unwrap();

        assert_eq!(batch.status, BatchStatus::Completed);
        let runs = conductor.runtime.workspace.store.list_runs(&ids[0]).unwrap();
        assert_eq!(runs.len(), 2);
    }

    #[tokio::test]
    async fn parallel_honors_store_dependencies() {
        let (_dir, conductor, ids) = fixture(ScriptedProvider::new(), &["model", "api"]);
        let store = &conductor.runtime.workspace.store;
        store.add_dependency(&ids[1], &ids[0]).unwrap();

        let batch = conductor
            .run_batch(&new_batch(&ids, BatchStrategy::Parallel))
            .await
            .unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);

        // The dependent task's run started after its dependency's finished.
        let dep_run = &store.list_runs(&ids[0]).unwrap()[0];
        let dependent_run = &store.list_runs(&ids[1]).unwrap()[0];
        assert!(dependent_run.started_at >= dep_run.finished_at.clone().unwrap());
    }

    #[tokio::test]
    async fn failed_dependency_parks_dependents_blocked() {
        let provider = ScriptedProvider::new()
            .push(ScriptedReply::Error(ProviderError::InvalidRequest("bad".into())));
        let (_dir, conductor, ids) = fixture(provider, &["base", "dependent"]);
        let store = &conductor.runtime.workspace.store;
        store.add_dependency(&ids[1], &ids[0]).unwrap();

        let batch = conductor
            .run_batch(&new_batch(&ids, BatchStrategy::Parallel))
            .await
            .unwrap();

        assert_eq!(batch.results[&ids[1]], RunStatus::Blocked);
        let dependent = store.get_task(&ids[1]).unwrap();
        assert_eq!(dependent.status, TaskStatus::Blocked);
        let blockers = store.list_blockers_for_task(&ids[1]).unwrap();
        assert_eq!(blockers.len(), 1);
        assert_eq!(blockers[0].category, BlockerCategory::ExternalDependency);
        // Nothing succeeded, so the batch is FAILED, not PARTIAL.
        assert_eq!(batch.status, BatchStatus::Failed);
    }

    #[tokio::test]
    async fn auto_strategy_infers_and_persists_the_map() {
        let provider = ScriptedProvider::new()
            .push_text(r#"{"1": [], "2": [1], "3": []}"#);
        let (_dir, conductor, ids) =
            fixture(provider, &["create model", "add API using model", "write README"]);

        let batch = conductor
            .run_batch(&new_batch(&ids, BatchStrategy::Auto))
            .await
            .unwrap();

        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.dependency_map[&ids[1]], vec![ids[0].clone()]);
        assert!(batch.dependency_map[&ids[2]].is_empty());

        let store = &conductor.runtime.workspace.store;
        let model_run = &store.list_runs(&ids[0]).unwrap()[0];
        let api_run = &store.list_runs(&ids[1]).unwrap()[0];
        assert!(api_run.started_at >= model_run.finished_at.clone().unwrap());
    }

    #[tokio::test]
    async fn auto_strategy_rejects_cyclic_inference() {
        let provider = ScriptedProvider::new().push_text(r#"{"1": [2], "2": [1]}"#);
        let (_dir, conductor, ids) = fixture(provider, &["a", "b"]);

        let err = conductor
            .run_batch(&new_batch(&ids, BatchStrategy::Auto))
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::InvalidDependencyMap(_)));
    }

    #[tokio::test]
    async fn supervisor_auto_resolves_tactical_blockers_and_requeues() {
        let provider = ScriptedProvider::new().push_text(
            "<blocker mode=\"sync\" category=\"tactical-decision\">Which of pytest, unittest \
             should I use?</blocker>",
        );
        let (_dir, conductor, ids) = fixture(provider, &["write tests"]);

        let batch = conductor
            .run_batch(&new_batch(&ids, BatchStrategy::Serial))
            .await
            .unwrap();

        // Blocked once, auto-resolved, re-queued, completed on the second
        // run (exhausted script => terminal text).
        assert_eq!(batch.status, BatchStatus::Completed);
        let store = &conductor.runtime.workspace.store;
        assert_eq!(store.get_task(&ids[0]).unwrap().status, TaskStatus::Done);
        let blockers = store.list_blockers_for_task(&ids[0]).unwrap();
        assert_eq!(blockers[0].answer.as_deref(), Some("pytest"));
        assert_eq!(store.list_runs(&ids[0]).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn resume_reruns_only_failed_tasks() {
        let provider = ScriptedProvider::new()
            .push(ScriptedReply::Error(ProviderError::InvalidRequest("bad".into())));
        let (_dir, conductor, ids) = fixture(provider, &["fails", "works"]);

        let first = conductor
            .run_batch(&new_batch(&ids, BatchStrategy::Serial))
            .await
            .unwrap();
        assert_eq!(first.status, BatchStatus::Partial);

        let resumed = conductor.resume_batch(&first.id, false).await.unwrap();
        assert_eq!(resumed.status, BatchStatus::Completed);
        // The completed task was not re-run.
        assert_eq!(
            conductor.runtime.workspace.store.list_runs(&ids[1]).unwrap().len(),
            1
        );
        assert_eq!(
            conductor.runtime.workspace.store.list_runs(&ids[0]).unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn rerunning_a_done_task_is_a_no_op_without_force() {
        let (_dir, conductor, ids) = fixture(ScriptedProvider::new(), &["once"]);
        let first = conductor
            .run_batch(&new_batch(&ids, BatchStrategy::Serial))
            .await
            .unwrap();
        assert_eq!(first.status, BatchStatus::Completed);

        let second = conductor
            .run_batch(&new_batch(&ids, BatchStrategy::Serial))
            .await
            .unwrap();
        assert_eq!(second.status, BatchStatus::Completed);
        // Still exactly one run: DONE tasks are skipped.
        assert_eq!(
            conductor.runtime.workspace.store.list_runs(&ids[0]).unwrap().len(),
            1
        );
    }

    #[test]
    fn final_status_rules() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let mut results = BTreeMap::new();
        results.insert("a".to_string(), RunStatus::Completed);
        results.insert("b".to_string(), RunStatus::Completed);
        assert_eq!(final_status(&ids, &results, false), BatchStatus::Completed);

        results.insert("b".to_string(), RunStatus::Failed);
        assert_eq!(final_status(&ids, &results, false), BatchStatus::Partial);

        results.insert("a".to_string(), RunStatus::Failed);
        assert_eq!(final_status(&ids, &results, false), BatchStatus::Failed);

        // Cancellation wins even when nothing succeeded.
        assert_eq!(final_status(&ids, &results, true), BatchStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_unknown_batch_is_an_error() {
        let (_dir, conductor, _) = fixture(ScriptedProvider::new(), &["a"]);
        assert!(conductor.cancel_batch("nope").is_err());
    }
}
