//! Blocker repository. The blocker *service* (events, expiry policy, task
//! unblocking) lives in `crate::blockers`; this module is plain persistence.

use super::StateStore;
use super::models::{Blocker, BlockerCategory, BlockerMode, BlockerStatus};
use crate::errors::StoreError;
use crate::util;
use chrono::{Duration, Utc};
use rusqlite::{Row, params};
use std::str::FromStr;

const BLOCKER_COLUMNS: &str =
    "id, task_id, mode, question, context, category, status, answer, created_at, answered_at, expires_at";

fn map_blocker_row(row: &Row) -> rusqlite::Result<Blocker> {
    Ok(Blocker {
        id: row.get(0)?,
        task_id: row.get(1)?,
        mode: BlockerMode::from_str(&row.get::<_, String>(2)?).unwrap_or(BlockerMode::Sync),
        question: row.get(3)?,
        context: row.get(4)?,
        category: BlockerCategory::from_str(&row.get::<_, String>(5)?)
            .unwrap_or(BlockerCategory::MissingInfo),
        status: BlockerStatus::from_str(&row.get::<_, String>(6)?).unwrap_or(BlockerStatus::Open),
        answer: row.get(7)?,
        created_at: row.get(8)?,
        answered_at: row.get(9)?,
        expires_at: row.get(10)?,
    })
}

impl StateStore {
    pub fn create_blocker(
        &self,
        task_id: &str,
        mode: BlockerMode,
        question: &str,
        context: &str,
        category: BlockerCategory,
        expiry_hours: i64,
    ) -> Result<Blocker, StoreError> {
        let id = util::new_id();
        let created_at = util::now_iso();
        let expires_at = util::format_iso(Utc::now() + Duration::hours(expiry_hours));
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO blockers (id, task_id, mode, question, context, category,
                                       status, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'OPEN', ?7, ?8)",
                params![
                    id,
                    task_id,
                    mode.as_str(),
                    question,
                    context,
                    category.as_str(),
                    created_at,
                    expires_at
                ],
            )?;
            conn.query_row(
                &format!("SELECT {BLOCKER_COLUMNS} FROM blockers WHERE id = ?1"),
                params![id],
                map_blocker_row,
            )
            .map_err(Into::into)
        })
    }

    pub fn get_blocker(&self, id: &str) -> Result<Blocker, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {BLOCKER_COLUMNS} FROM blockers WHERE id = ?1"),
                params![id],
                map_blocker_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                    entity: "blocker",
                    id: id.to_string(),
                },
                other => other.into(),
            })
        })
    }

    pub fn set_blocker_answer(&self, id: &str, answer: &str) -> Result<Blocker, StoreError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE blockers SET status = 'ANSWERED', answer = ?1, answered_at = ?2
                 WHERE id = ?3",
                params![answer, util::now_iso(), id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    entity: "blocker",
                    id: id.to_string(),
                });
            }
            conn.query_row(
                &format!("SELECT {BLOCKER_COLUMNS} FROM blockers WHERE id = ?1"),
                params![id],
                map_blocker_row,
            )
            .map_err(Into::into)
        })
    }

    pub fn set_blocker_status(
        &self,
        id: &str,
        status: BlockerStatus,
    ) -> Result<Blocker, StoreError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE blockers SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    entity: "blocker",
                    id: id.to_string(),
                });
            }
            conn.query_row(
                &format!("SELECT {BLOCKER_COLUMNS} FROM blockers WHERE id = ?1"),
                params![id],
                map_blocker_row,
            )
            .map_err(Into::into)
        })
    }

    pub fn list_blockers_for_task(&self, task_id: &str) -> Result<Vec<Blocker>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BLOCKER_COLUMNS} FROM blockers WHERE task_id = ?1 ORDER BY created_at"
            ))?;
            let blockers = stmt
                .query_map(params![task_id], map_blocker_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(blockers)
        })
    }

    /// All OPEN blockers in the workspace, oldest first.
    pub fn list_open_blockers(&self, workspace_id: &str) -> Result<Vec<Blocker>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BLOCKER_COLUMNS} FROM blockers
                 WHERE status = 'OPEN'
                   AND task_id IN (SELECT id FROM tasks WHERE workspace_id = ?1)
                 ORDER BY created_at"
            ))?;
            let blockers = stmt
                .query_map(params![workspace_id], map_blocker_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(blockers)
        })
    }
}
