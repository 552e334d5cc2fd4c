//! Embedded transactional state store, one SQLite file per workspace.
//!
//! WAL journaling, foreign keys ON, single-writer discipline: every access
//! goes through one connection behind a mutex, held only for the duration of
//! a statement or short transaction (never across an await point). Busy
//! errors are retried with bounded exponential backoff before surfacing as
//! `StoreError::DatabaseLocked`.

mod migrations;
pub mod models;

pub mod batches;
pub mod blockers;
pub mod prds;
pub mod runs;
pub mod tasks;

use crate::errors::StoreError;
use crate::util;
use models::WorkspaceRecord;
use rusqlite::{Connection, ErrorCode, params};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// Maximum busy retries before `DatabaseLocked`.
const MAX_BUSY_ATTEMPTS: u32 = 5;
const BUSY_BASE_DELAY_MS: u64 = 50;

pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    /// Open (or create) the store at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_millis(250))?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with the connection, retrying bounded times on SQLITE_BUSY.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl Fn(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().expect("state store mutex poisoned");
        let mut attempt = 0u32;
        loop {
            match f(&conn) {
                Err(StoreError::Sqlite(e)) if is_busy(&e) => {
                    attempt += 1;
                    if attempt >= MAX_BUSY_ATTEMPTS {
                        return Err(StoreError::DatabaseLocked {
                            attempts: MAX_BUSY_ATTEMPTS,
                        });
                    }
                    std::thread::sleep(Duration::from_millis(
                        BUSY_BASE_DELAY_MS << (attempt - 1),
                    ));
                }
                other => return other,
            }
        }
    }

    /// Run `f` inside a short-lived write transaction. Rolls back on error.
    pub fn with_tx<T>(
        &self,
        f: impl Fn(&rusqlite::Transaction) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().expect("state store mutex poisoned");
        let mut attempt = 0u32;
        loop {
            let result: Result<T, StoreError> = (|| {
                let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                let value = f(&tx)?;
                tx.commit()?;
                Ok(value)
            })();
            match result {
                Err(StoreError::Sqlite(e)) if is_busy(&e) => {
                    attempt += 1;
                    if attempt >= MAX_BUSY_ATTEMPTS {
                        return Err(StoreError::DatabaseLocked {
                            attempts: MAX_BUSY_ATTEMPTS,
                        });
                    }
                    std::thread::sleep(Duration::from_millis(
                        BUSY_BASE_DELAY_MS << (attempt - 1),
                    ));
                }
                other => return other,
            }
        }
    }

    /// Flush the WAL into the main database file so a plain file copy is a
    /// complete snapshot. Used by checkpoint create.
    pub fn flush_wal(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let _: (i64, i64, i64) = conn.query_row(
                "PRAGMA wal_checkpoint(TRUNCATE)",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            Ok(())
        })
    }

    // ── Workspace ─────────────────────────────────────────────────────

    /// Register the workspace row. Called once by `init`.
    pub fn create_workspace(&self, repo_path: &str) -> Result<WorkspaceRecord, StoreError> {
        let record = WorkspaceRecord {
            id: util::new_id(),
            repo_path: repo_path.to_string(),
            created_at: util::now_iso(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO workspace (id, repo_path, created_at) VALUES (?1, ?2, ?3)",
                params![record.id, record.repo_path, record.created_at],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    /// The workspace this store belongs to (exactly one row).
    pub fn workspace(&self) -> Result<WorkspaceRecord, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, repo_path, created_at FROM workspace LIMIT 1",
                [],
                |row| {
                    Ok(WorkspaceRecord {
                        id: row.get(0)?,
                        repo_path: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                    entity: "workspace",
                    id: "(singleton)".into(),
                },
                other => other.into(),
            })
        })
    }

    // ── Supervisor decision cache ─────────────────────────────────────

    pub fn record_decision(
        &self,
        workspace_id: &str,
        kind: &str,
        answer: &str,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO decisions (workspace_id, kind, answer, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(workspace_id, kind) DO UPDATE SET answer = excluded.answer",
                params![workspace_id, kind, answer, util::now_iso()],
            )?;
            Ok(())
        })
    }

    pub fn lookup_decision(
        &self,
        workspace_id: &str,
        kind: &str,
    ) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            match conn.query_row(
                "SELECT answer FROM decisions WHERE workspace_id = ?1 AND kind = ?2",
                params![workspace_id, kind],
                |row| row.get::<_, String>(0),
            ) {
                Ok(answer) => Ok(Some(answer)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}
