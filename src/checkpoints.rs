//! Labelled workspace checkpoints: a git snapshot commit, a state-store
//! copy, and the event cursor, restored together as a unit.
//!
//! Restore is refused while any batch is active; it is the one operation
//! allowed to truncate the event log (back to the snapshot's cursor).

use crate::errors::CheckpointError;
use crate::events::EventType;
use crate::tracker::GitTracker;
use crate::util;
use crate::workspace::Workspace;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const METADATA_FILE: &str = "metadata.json";
const DB_COPY: &str = "state.db";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub id: String,
    pub label: String,
    /// Snapshot commit sha.
    pub git_ref: String,
    /// Event-log cursor at snapshot time.
    pub event_cursor: i64,
    pub created_at: String,
}

fn checkpoint_dir(workspace: &Workspace, id: &str) -> PathBuf {
    workspace.checkpoints_dir().join(id)
}

/// Snapshot the workspace under `label`.
pub fn create(workspace: &Workspace, label: &str) -> Result<CheckpointMeta, CheckpointError> {
    let tracker = GitTracker::init_if_missing(&workspace.root)
        .map_err(|e| CheckpointError::Git(git2::Error::from_str(&e.to_string())))?;
    let git_ref = tracker
        .snapshot(label)
        .map_err(|e| CheckpointError::Git(git2::Error::from_str(&e.to_string())))?;

    let meta = CheckpointMeta {
        id: util::new_id(),
        label: label.to_string(),
        git_ref,
        event_cursor: workspace.events.cursor()?,
        created_at: util::now_iso(),
    };

    let dir = checkpoint_dir(workspace, &meta.id);
    std::fs::create_dir_all(&dir)?;

    workspace.store.flush_wal()?;
    std::fs::copy(workspace.db_path(), dir.join(DB_COPY))?;
    std::fs::write(
        dir.join(METADATA_FILE),
        serde_json::to_string_pretty(&meta).expect("meta serializes"),
    )?;

    workspace.events.emit(
        EventType::CheckpointCreated,
        &meta.id,
        serde_json::json!({ "label": label, "git_ref": meta.git_ref }),
    )?;
    tracing::info!(checkpoint_id = %meta.id, label, "checkpoint created");
    Ok(meta)
}

/// All checkpoints, oldest first.
pub fn list(workspace: &Workspace) -> Result<Vec<CheckpointMeta>, CheckpointError> {
    let dir = workspace.checkpoints_dir();
    let mut metas = Vec::new();
    if !dir.exists() {
        return Ok(metas);
    }
    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path().join(METADATA_FILE);
        let Ok(raw) = std::fs::read_to_string(&path) else {
            continue;
        };
        if let Ok(meta) = serde_json::from_str::<CheckpointMeta>(&raw) {
            metas.push(meta);
        }
    }
    metas.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(metas)
}

/// Restore git ref + state store + event cursor as a unit. The workspace's
/// store handle is reopened on the restored file.
pub fn restore(workspace: &mut Workspace, id: &str) -> Result<CheckpointMeta, CheckpointError> {
    let meta_path = checkpoint_dir(workspace, id).join(METADATA_FILE);
    let raw = std::fs::read_to_string(&meta_path)
        .map_err(|_| CheckpointError::NotFound(id.to_string()))?;
    let meta: CheckpointMeta =
        serde_json::from_str(&raw).map_err(|_| CheckpointError::NotFound(id.to_string()))?;

    if workspace.store.any_batch_active(workspace.id())? {
        return Err(CheckpointError::BatchActive);
    }

    let tracker = GitTracker::new(&workspace.root)
        .map_err(|e| CheckpointError::Git(git2::Error::from_str(&e.to_string())))?;
    tracker
        .checkout(&meta.git_ref)
        .map_err(|e| CheckpointError::Git(git2::Error::from_str(&e.to_string())))?;

    // Swap the database file and reopen on it. Stale WAL sidecars from the
    // pre-restore database must not survive the swap.
    let db_path = workspace.db_path();
    workspace.store.flush_wal()?;
    for suffix in ["-wal", "-shm"] {
        let sidecar = PathBuf::from(format!("{}{suffix}", db_path.display()));
        let _ = std::fs::remove_file(sidecar);
    }
    std::fs::copy(checkpoint_dir(workspace, id).join(DB_COPY), &db_path)?;
    workspace.reopen_store()?;

    workspace.events.truncate_after(meta.event_cursor)?;
    tracing::info!(checkpoint_id = %meta.id, "checkpoint restored");
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::TaskStatus;
    use crate::store::tasks::NewTask;
    use tempfile::TempDir;

    fn workspace_fixture() -> (TempDir, Workspace) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("code.py"), "x = 1\n").unwrap();
        let workspace = Workspace::init(dir.path()).unwrap();
        (dir, workspace)
    }

    #[test]
    fn create_then_mutate_then_restore_round_trips() {
        let (dir, mut workspace) = workspace_fixture();
        let task = workspace
            .store
            .create_task(
                workspace.id(),
                &NewTask {
                    title: "before snapshot".into(),
                    ..Default::default()
                },
            )
            .unwrap();

        let meta = create(&workspace, "clean state").unwrap();

        // Mutate everything the checkpoint covers.
        std::fs::write(dir.path().join("code.py"), "x = 999\n").unwrap();
        workspace
            .store
            .set_task_status(&task.id, TaskStatus::Ready)
            .unwrap();
        workspace
            .store
            .create_task(
                workspace.id(),
                &NewTask {
                    title: "after snapshot".into(),
                    ..Default::default()
                },
            )
            .unwrap();

        let restored = restore(&mut workspace, &meta.id).unwrap();
        assert_eq!(restored.id, meta.id);

        // Git content restored.
        assert_eq!(
            std::fs::read_to_string(dir.path().join("code.py")).unwrap(),
            "x = 1\n"
        );
        // Store restored: one task, back in BACKLOG.
        let tasks = workspace.store.list_tasks(workspace.id(), None).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Backlog);
        // Events truncated to the snapshot cursor.
        assert_eq!(workspace.events.cursor().unwrap(), meta.event_cursor);
    }

    #[test]
    fn list_orders_by_creation() {
        let (_dir, workspace) = workspace_fixture();
        let first = create(&workspace, "first").unwrap();
        let second = create(&workspace, "second").unwrap();

        let listed = list(&workspace).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
    }

    #[test]
    fn restore_refused_while_batch_active() {
        let (_dir, mut workspace) = workspace_fixture();
        let task = workspace
            .store
            .create_task(
                workspace.id(),
                &NewTask {
                    title: "t".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        let meta = create(&workspace, "cp").unwrap();

        let batch = workspace
            .store
            .create_batch(
                workspace.id(),
                &crate::store::batches::NewBatch {
                    task_ids: vec![task.id],
                    strategy: crate::store::models::BatchStrategy::Serial,
                    max_parallel: 1,
                    on_failure: crate::store::models::OnFailure::Continue,
                    retry_budget: 0,
                },
            )
            .unwrap();
        workspace.store.mark_batch_started(&batch.id).unwrap();

        let err = restore(&mut workspace, &meta.id).unwrap_err();
        assert!(matches!(err, CheckpointError::BatchActive));
    }

    #[test]
    fn restoring_unknown_checkpoint_fails() {
        let (_dir, mut workspace) = workspace_fixture();
        assert!(matches!(
            restore(&mut workspace, "missing").unwrap_err(),
            CheckpointError::NotFound(_)
        ));
    }
}
