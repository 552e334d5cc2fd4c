//! Run repository: execution attempts of tasks.

use super::StateStore;
use super::models::{EngineKind, Run, RunStatus, TokenUsage};
use crate::errors::StoreError;
use crate::util;
use rusqlite::{Row, params};
use std::str::FromStr;

const RUN_COLUMNS: &str = "id, task_id, engine, status, iterations, input_tokens, output_tokens, \
                           total_tokens, started_at, finished_at, summary, last_error, cancel_requested";

fn map_run_row(row: &Row) -> rusqlite::Result<Run> {
    Ok(Run {
        id: row.get(0)?,
        task_id: row.get(1)?,
        engine: EngineKind::from_str(&row.get::<_, String>(2)?).unwrap_or(EngineKind::React),
        status: RunStatus::from_str(&row.get::<_, String>(3)?).unwrap_or(RunStatus::Failed),
        iterations: row.get::<_, i64>(4)? as u32,
        usage: TokenUsage {
            input_tokens: row.get::<_, i64>(5)? as u64,
            output_tokens: row.get::<_, i64>(6)? as u64,
            total_tokens: row.get::<_, i64>(7)? as u64,
        },
        started_at: row.get(8)?,
        finished_at: row.get(9)?,
        summary: row.get(10)?,
        last_error: row.get(11)?,
        cancel_requested: row.get::<_, i64>(12)? != 0,
    })
}

impl StateStore {
    /// Create a RUNNING run for a task. At most one run per task may be
    /// RUNNING; a second attempt fails with `RunAlreadyActive`.
    pub fn create_run(&self, task_id: &str, engine: EngineKind) -> Result<Run, StoreError> {
        let id = util::new_id();
        self.with_tx(move |tx| {
            let active: bool = tx
                .prepare("SELECT 1 FROM runs WHERE task_id = ?1 AND status = 'RUNNING'")?
                .exists(params![task_id])?;
            if active {
                return Err(StoreError::RunAlreadyActive {
                    task_id: task_id.to_string(),
                });
            }
            tx.execute(
                "INSERT INTO runs (id, task_id, engine, status, started_at)
                 VALUES (?1, ?2, ?3, 'RUNNING', ?4)",
                params![id, task_id, engine.as_str(), util::now_iso()],
            )?;
            tx.query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                params![id],
                map_run_row,
            )
            .map_err(Into::into)
        })
    }

    pub fn get_run(&self, id: &str) -> Result<Run, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                params![id],
                map_run_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                    entity: "run",
                    id: id.to_string(),
                },
                other => other.into(),
            })
        })
    }

    pub fn list_runs(&self, task_id: &str) -> Result<Vec<Run>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM runs WHERE task_id = ?1 ORDER BY started_at"
            ))?;
            let runs = stmt
                .query_map(params![task_id], map_run_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(runs)
        })
    }

    pub fn latest_run(&self, task_id: &str) -> Result<Option<Run>, StoreError> {
        Ok(self.list_runs(task_id)?.into_iter().last())
    }

    /// Record the terminal outcome of a run.
    pub fn finish_run(
        &self,
        id: &str,
        status: RunStatus,
        iterations: u32,
        usage: &TokenUsage,
        summary: Option<&str>,
        last_error: Option<&str>,
    ) -> Result<Run, StoreError> {
        let usage = *usage;
        self.with_tx(move |tx| {
            let changed = tx.execute(
                "UPDATE runs SET status = ?1, iterations = ?2, input_tokens = ?3,
                        output_tokens = ?4, total_tokens = ?5, finished_at = ?6,
                        summary = ?7, last_error = ?8
                 WHERE id = ?9",
                params![
                    status.as_str(),
                    iterations as i64,
                    usage.input_tokens as i64,
                    usage.output_tokens as i64,
                    usage.total_tokens as i64,
                    util::now_iso(),
                    summary,
                    last_error,
                    id
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    entity: "run",
                    id: id.to_string(),
                });
            }
            tx.query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                params![id],
                map_run_row,
            )
            .map_err(Into::into)
        })
    }

    /// Aggregate token usage over every run in the workspace.
    pub fn workspace_usage(&self, workspace_id: &str) -> Result<TokenUsage, StoreError> {
        self.with_conn(|conn| {
            let (input, output, total): (i64, i64, i64) = conn.query_row(
                "SELECT COALESCE(SUM(r.input_tokens), 0), COALESCE(SUM(r.output_tokens), 0),
                        COALESCE(SUM(r.total_tokens), 0)
                 FROM runs r JOIN tasks t ON t.id = r.task_id
                 WHERE t.workspace_id = ?1",
                params![workspace_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            Ok(TokenUsage {
                input_tokens: input as u64,
                output_tokens: output as u64,
                total_tokens: total as u64,
            })
        })
    }

    /// Durable cooperative-cancel request against the RUNNING run of a task.
    /// Returns false when no run is currently RUNNING.
    pub fn request_run_cancel(&self, task_id: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE runs SET cancel_requested = 1 WHERE task_id = ?1 AND status = 'RUNNING'",
                params![task_id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Checked by the agent at every suspension point.
    pub fn run_cancel_requested(&self, run_id: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let flag: i64 = conn
                .query_row(
                    "SELECT cancel_requested FROM runs WHERE id = ?1",
                    params![run_id],
                    |row| row.get(0),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                        entity: "run",
                        id: run_id.to_string(),
                    },
                    other => other.into(),
                })?;
            Ok(flag != 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tasks::NewTask;

    fn fixture() -> (StateStore, String) {
        let store = StateStore::open_in_memory().unwrap();
        let ws = store.create_workspace("/repo").unwrap();
        let task = store
            .create_task(
                &ws.id,
                &NewTask {
                    title: "t".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        (store, task.id)
    }

    #[test]
    fn at_most_one_running_run_per_task() {
        let (store, task_id) = fixture();
        let run = store.create_run(&task_id, EngineKind::React).unwrap();
        assert_eq!(run.status, RunStatus::Running);

        let err = store.create_run(&task_id, EngineKind::React).unwrap_err();
        assert!(matches!(err, StoreError::RunAlreadyActive { .. }));

        // Finishing the first run frees the slot.
        store
            .finish_run(
                &run.id,
                RunStatus::Completed,
                3,
                &TokenUsage::default(),
                Some("done"),
                None,
            )
            .unwrap();
        store.create_run(&task_id, EngineKind::React).unwrap();
    }

    #[test]
    fn finish_records_usage_and_summary() {
        let (store, task_id) = fixture();
        let run = store.create_run(&task_id, EngineKind::Plan).unwrap();
        let usage = TokenUsage {
            input_tokens: 100,
            output_tokens: 40,
            total_tokens: 140,
        };
        let finished = store
            .finish_run(&run.id, RunStatus::Failed, 7, &usage, None, Some("boom"))
            .unwrap();
        assert_eq!(finished.status, RunStatus::Failed);
        assert_eq!(finished.iterations, 7);
        assert_eq!(finished.usage, usage);
        assert_eq!(finished.last_error.as_deref(), Some("boom"));
        assert!(finished.finished_at.is_some());
        assert_eq!(finished.engine, EngineKind::Plan);
    }

    #[test]
    fn cancel_request_targets_running_run() {
        let (store, task_id) = fixture();
        assert!(!store.request_run_cancel(&task_id).unwrap());

        let run = store.create_run(&task_id, EngineKind::React).unwrap();
        assert!(!store.run_cancel_requested(&run.id).unwrap());
        assert!(store.request_run_cancel(&task_id).unwrap());
        assert!(store.run_cancel_requested(&run.id).unwrap());
    }
}
