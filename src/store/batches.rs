//! Batch repository: scheduled task groups and their per-task results.

use super::StateStore;
use super::models::{Batch, BatchStatus, BatchStrategy, OnFailure, RunStatus, TokenUsage};
use crate::errors::StoreError;
use crate::util;
use rusqlite::{Row, params};
use std::collections::BTreeMap;
use std::str::FromStr;

const BATCH_COLUMNS: &str = "id, workspace_id, task_ids, strategy, max_parallel, on_failure, \
                             retry_budget, status, dependency_map, results, input_tokens, \
                             output_tokens, total_tokens, started_at, finished_at";

fn map_batch_row(row: &Row) -> rusqlite::Result<Batch> {
    let task_ids: Vec<String> =
        serde_json::from_str(&row.get::<_, String>(2)?).unwrap_or_default();
    let dependency_map: BTreeMap<String, Vec<String>> =
        serde_json::from_str(&row.get::<_, String>(8)?).unwrap_or_default();
    let results: BTreeMap<String, RunStatus> =
        serde_json::from_str(&row.get::<_, String>(9)?).unwrap_or_default();
    Ok(Batch {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        task_ids,
        strategy: BatchStrategy::from_str(&row.get::<_, String>(3)?)
            .unwrap_or(BatchStrategy::Parallel),
        max_parallel: row.get::<_, i64>(4)? as usize,
        on_failure: OnFailure::from_str(&row.get::<_, String>(5)?).unwrap_or(OnFailure::Continue),
        retry_budget: row.get::<_, i64>(6)? as u32,
        status: BatchStatus::from_str(&row.get::<_, String>(7)?).unwrap_or(BatchStatus::Pending),
        dependency_map,
        results,
        usage: TokenUsage {
            input_tokens: row.get::<_, i64>(10)? as u64,
            output_tokens: row.get::<_, i64>(11)? as u64,
            total_tokens: row.get::<_, i64>(12)? as u64,
        },
        started_at: row.get(13)?,
        finished_at: row.get(14)?,
    })
}

/// Fields accepted when creating a batch.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub task_ids: Vec<String>,
    pub strategy: BatchStrategy,
    pub max_parallel: usize,
    pub on_failure: OnFailure,
    pub retry_budget: u32,
}

impl StateStore {
    pub fn create_batch(&self, workspace_id: &str, new: &NewBatch) -> Result<Batch, StoreError> {
        let id = util::new_id();
        let new = new.clone();
        self.with_tx(move |tx| {
            // Every task must belong to this workspace.
            for task_id in &new.task_ids {
                let owner: String = tx
                    .query_row(
                        "SELECT workspace_id FROM tasks WHERE id = ?1",
                        params![task_id],
                        |row| row.get(0),
                    )
                    .map_err(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                            entity: "task",
                            id: task_id.clone(),
                        },
                        other => other.into(),
                    })?;
                if owner != workspace_id {
                    return Err(StoreError::Integrity(format!(
                        "task {task_id} belongs to workspace {owner}"
                    )));
                }
            }
            tx.execute(
                "INSERT INTO batches (id, workspace_id, task_ids, strategy, max_parallel,
                                      on_failure, retry_budget, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'PENDING')",
                params![
                    id,
                    workspace_id,
                    serde_json::to_string(&new.task_ids).unwrap_or_else(|_| "[]".into()),
                    new.strategy.as_str(),
                    new.max_parallel as i64,
                    new.on_failure.as_str(),
                    new.retry_budget as i64
                ],
            )?;
            tx.query_row(
                &format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?1"),
                params![id],
                map_batch_row,
            )
            .map_err(Into::into)
        })
    }

    pub fn get_batch(&self, id: &str) -> Result<Batch, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?1"),
                params![id],
                map_batch_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                    entity: "batch",
                    id: id.to_string(),
                },
                other => other.into(),
            })
        })
    }

    pub fn list_batches(&self, workspace_id: &str) -> Result<Vec<Batch>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BATCH_COLUMNS} FROM batches WHERE workspace_id = ?1
                 ORDER BY started_at IS NULL, started_at"
            ))?;
            let batches = stmt
                .query_map(params![workspace_id], map_batch_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(batches)
        })
    }

    /// True while any batch in the workspace is PENDING or RUNNING; used by
    /// checkpoint restore, which requires an idle batch system.
    pub fn any_batch_active(&self, workspace_id: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let active: bool = conn
                .prepare(
                    "SELECT 1 FROM batches
                     WHERE workspace_id = ?1 AND status IN ('PENDING','RUNNING')",
                )?
                .exists(params![workspace_id])?;
            Ok(active)
        })
    }

    pub fn mark_batch_started(&self, id: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE batches SET status = 'RUNNING', started_at = ?1 WHERE id = ?2",
                params![util::now_iso(), id],
            )?;
            Ok(())
        })
    }

    pub fn save_batch_dependency_map(
        &self,
        id: &str,
        map: &BTreeMap<String, Vec<String>>,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(map).unwrap_or_else(|_| "{}".into());
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE batches SET dependency_map = ?1 WHERE id = ?2",
                params![json, id],
            )?;
            Ok(())
        })
    }

    /// Persist a terminal (or intermediate) snapshot of per-task results.
    pub fn save_batch_results(
        &self,
        id: &str,
        status: BatchStatus,
        results: &BTreeMap<String, RunStatus>,
        usage: &TokenUsage,
        finished: bool,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(results).unwrap_or_else(|_| "{}".into());
        let usage = *usage;
        self.with_conn(move |conn| {
            let finished_at = if finished { Some(util::now_iso()) } else { None };
            conn.execute(
                "UPDATE batches SET status = ?1, results = ?2, input_tokens = ?3,
                        output_tokens = ?4, total_tokens = ?5,
                        finished_at = COALESCE(?6, finished_at)
                 WHERE id = ?7",
                params![
                    status.as_str(),
                    json,
                    usage.input_tokens as i64,
                    usage.output_tokens as i64,
                    usage.total_tokens as i64,
                    finished_at,
                    id
                ],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tasks::NewTask;

    fn fixture() -> (StateStore, String, Vec<String>) {
        let store = StateStore::open_in_memory().unwrap();
        let ws = store.create_workspace("/repo").unwrap();
        let ids = (0..3)
            .map(|i| {
                store
                    .create_task(
                        &ws.id,
                        &NewTask {
                            title: format!("task {i}"),
                            ..Default::default()
                        },
                    )
                    .unwrap()
                    .id
            })
            .collect();
        (store, ws.id, ids)
    }

    fn new_batch(ids: &[String]) -> NewBatch {
        NewBatch {
            task_ids: ids.to_vec(),
            strategy: BatchStrategy::Parallel,
            max_parallel: 4,
            on_failure: OnFailure::Continue,
            retry_budget: 0,
        }
    }

    #[test]
    fn create_and_reload_round_trips() {
        let (store, ws, ids) = fixture();
        let batch = store.create_batch(&ws, &new_batch(&ids)).unwrap();
        assert_eq!(batch.status, BatchStatus::Pending);
        assert_eq!(batch.task_ids, ids);

        let loaded = store.get_batch(&batch.id).unwrap();
        assert_eq!(loaded.task_ids, ids);
        assert_eq!(loaded.max_parallel, 4);
    }

    #[test]
    fn foreign_tasks_are_rejected() {
        let (store, _ws, _) = fixture();
        let other_ws = store.create_workspace("/other").unwrap();
        let err = store
            .create_batch(&other_ws.id, &new_batch(&["missing".to_string()]))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn results_snapshot_persists() {
        let (store, ws, ids) = fixture();
        let batch = store.create_batch(&ws, &new_batch(&ids)).unwrap();
        store.mark_batch_started(&batch.id).unwrap();
        assert!(store.any_batch_active(&ws).unwrap());

        let mut results = BTreeMap::new();
        results.insert(ids[0].clone(), RunStatus::Completed);
        results.insert(ids[1].clone(), RunStatus::Failed);
        let usage = TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
        };
        store
            .save_batch_results(&batch.id, BatchStatus::Partial, &results, &usage, true)
            .unwrap();

        let loaded = store.get_batch(&batch.id).unwrap();
        assert_eq!(loaded.status, BatchStatus::Partial);
        assert_eq!(loaded.results.get(&ids[1]), Some(&RunStatus::Failed));
        assert_eq!(loaded.usage.total_tokens, 15);
        assert!(loaded.finished_at.is_some());
        assert!(!store.any_batch_active(&ws).unwrap());
    }
}
