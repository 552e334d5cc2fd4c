//! Ordered schema migrations for the workspace state store.
//!
//! Each migration is an idempotent SQL batch applied exactly once; applied
//! versions are recorded in `schema_version`. Integrity rules the schema
//! enforces itself (rather than application code): task status CHECK
//! constraints, referential integrity for workspace/task/blocker links, and
//! `UNIQUE(workspace_id, task_number)`.

use crate::errors::StoreError;
use rusqlite::Connection;

/// All migrations in application order. Append only; never edit a shipped
/// entry.
const MIGRATIONS: &[(u32, &str)] = &[(
    1,
    "
    CREATE TABLE IF NOT EXISTS workspace (
        id TEXT PRIMARY KEY,
        repo_path TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS prds (
        id TEXT PRIMARY KEY,
        workspace_id TEXT NOT NULL REFERENCES workspace(id) ON DELETE CASCADE,
        content TEXT NOT NULL,
        version INTEGER NOT NULL,
        parent_id TEXT REFERENCES prds(id),
        chain_id TEXT NOT NULL,
        change_summary TEXT,
        created_at TEXT NOT NULL,
        UNIQUE(chain_id, version)
    );

    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        workspace_id TEXT NOT NULL REFERENCES workspace(id) ON DELETE CASCADE,
        task_number INTEGER NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'BACKLOG'
            CHECK (status IN ('BACKLOG','READY','IN_PROGRESS','BLOCKED','DONE','FAILED','MERGED')),
        priority INTEGER NOT NULL DEFAULT 0,
        complexity INTEGER NOT NULL DEFAULT 2 CHECK (complexity BETWEEN 1 AND 5),
        assignee_hint TEXT,
        result_summary TEXT,
        created_at TEXT NOT NULL,
        completed_at TEXT,
        UNIQUE(workspace_id, task_number)
    );

    CREATE TABLE IF NOT EXISTS task_deps (
        task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        depends_on_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        PRIMARY KEY (task_id, depends_on_id)
    );

    CREATE TABLE IF NOT EXISTS runs (
        id TEXT PRIMARY KEY,
        task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        engine TEXT NOT NULL CHECK (engine IN ('react','plan')),
        status TEXT NOT NULL DEFAULT 'RUNNING'
            CHECK (status IN ('RUNNING','COMPLETED','FAILED','STOPPED','BLOCKED')),
        iterations INTEGER NOT NULL DEFAULT 0,
        input_tokens INTEGER NOT NULL DEFAULT 0,
        output_tokens INTEGER NOT NULL DEFAULT 0,
        total_tokens INTEGER NOT NULL DEFAULT 0,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        summary TEXT,
        last_error TEXT,
        cancel_requested INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS blockers (
        id TEXT PRIMARY KEY,
        task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        mode TEXT NOT NULL CHECK (mode IN ('SYNC','ASYNC')),
        question TEXT NOT NULL,
        context TEXT NOT NULL DEFAULT '',
        category TEXT NOT NULL CHECK (category IN
            ('missing-info','ambiguous-spec','external-dependency','tactical-decision','escalation')),
        status TEXT NOT NULL DEFAULT 'OPEN'
            CHECK (status IN ('OPEN','ANSWERED','RESOLVED','EXPIRED')),
        answer TEXT,
        created_at TEXT NOT NULL,
        answered_at TEXT,
        expires_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS batches (
        id TEXT PRIMARY KEY,
        workspace_id TEXT NOT NULL REFERENCES workspace(id) ON DELETE CASCADE,
        task_ids TEXT NOT NULL DEFAULT '[]',
        strategy TEXT NOT NULL CHECK (strategy IN ('SERIAL','PARALLEL','AUTO')),
        max_parallel INTEGER NOT NULL DEFAULT 4,
        on_failure TEXT NOT NULL DEFAULT 'CONTINUE' CHECK (on_failure IN ('CONTINUE','STOP')),
        retry_budget INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'PENDING'
            CHECK (status IN ('PENDING','RUNNING','COMPLETED','PARTIAL','FAILED','CANCELLED')),
        dependency_map TEXT NOT NULL DEFAULT '{}',
        results TEXT NOT NULL DEFAULT '{}',
        input_tokens INTEGER NOT NULL DEFAULT 0,
        output_tokens INTEGER NOT NULL DEFAULT 0,
        total_tokens INTEGER NOT NULL DEFAULT 0,
        started_at TEXT,
        finished_at TEXT
    );

    CREATE TABLE IF NOT EXISTS events (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        workspace_id TEXT NOT NULL REFERENCES workspace(id) ON DELETE CASCADE,
        timestamp TEXT NOT NULL,
        type TEXT NOT NULL,
        subject_id TEXT NOT NULL,
        payload TEXT NOT NULL DEFAULT '{}'
    );

    CREATE TABLE IF NOT EXISTS decisions (
        workspace_id TEXT NOT NULL REFERENCES workspace(id) ON DELETE CASCADE,
        kind TEXT NOT NULL,
        answer TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (workspace_id, kind)
    );

    CREATE INDEX IF NOT EXISTS idx_tasks_workspace_status ON tasks(workspace_id, status);
    CREATE INDEX IF NOT EXISTS idx_runs_task ON runs(task_id);
    CREATE INDEX IF NOT EXISTS idx_blockers_task_status ON blockers(task_id, status);
    CREATE INDEX IF NOT EXISTS idx_events_workspace_seq ON events(workspace_id, seq);
    ",
)];

/// Apply all unapplied migrations in order.
pub fn run(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;

    for (version, sql) in MIGRATIONS {
        let applied: bool = conn
            .prepare("SELECT 1 FROM schema_version WHERE version = ?1")?
            .exists([version])?;
        if applied {
            continue;
        }
        conn.execute_batch(sql).map_err(|e| StoreError::Migration {
            version: *version,
            message: e.to_string(),
        })?;
        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![version, crate::util::now_iso()],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_apply_once() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count as usize, MIGRATIONS.len());

        // Re-running is a no-op.
        run(&conn).unwrap();
        let count_again: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, count_again);
    }

    #[test]
    fn task_status_check_constraint_rejects_garbage() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        conn.execute(
            "INSERT INTO workspace (id, repo_path, created_at) VALUES ('w', '/tmp', 't')",
            [],
        )
        .unwrap();
        let result = conn.execute(
            "INSERT INTO tasks (id, workspace_id, task_number, title, status, created_at)
             VALUES ('t', 'w', 1, 'x', 'WIP', 'now')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn task_number_unique_per_workspace() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        conn.execute(
            "INSERT INTO workspace (id, repo_path, created_at) VALUES ('w', '/tmp', 't')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO tasks (id, workspace_id, task_number, title, created_at)
             VALUES ('t1', 'w', 1, 'a', 'now')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO tasks (id, workspace_id, task_number, title, created_at)
             VALUES ('t2', 'w', 1, 'b', 'now')",
            [],
        );
        assert!(dup.is_err());
    }
}
