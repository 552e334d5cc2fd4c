//! Task repository: creation, listing, status transitions, dependencies.

use super::StateStore;
use super::models::{Task, TaskStatus};
use crate::errors::StoreError;
use crate::util;
use rusqlite::{Connection, Row, params};
use std::collections::HashSet;
use std::str::FromStr;

/// Fields accepted when creating a task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub priority: i64,
    pub complexity: Option<u8>,
    pub depends_on: Vec<String>,
    pub assignee_hint: Option<String>,
}

fn map_task_row(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        task_number: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        status: TaskStatus::from_str(&row.get::<_, String>(5)?)
            .unwrap_or(TaskStatus::Backlog),
        priority: row.get(6)?,
        complexity: row.get::<_, i64>(7)? as u8,
        assignee_hint: row.get(8)?,
        result_summary: row.get(9)?,
        created_at: row.get(10)?,
        completed_at: row.get(11)?,
        depends_on: Vec::new(),
    })
}

const TASK_COLUMNS: &str = "id, workspace_id, task_number, title, description, status, priority, \
                            complexity, assignee_hint, result_summary, created_at, completed_at";

fn load_deps(conn: &Connection, task_id: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT depends_on_id FROM task_deps WHERE task_id = ?1 ORDER BY depends_on_id")?;
    let deps = stmt
        .query_map(params![task_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(deps)
}

fn get_task_inner(conn: &Connection, id: &str) -> Result<Task, StoreError> {
    let mut task = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            params![id],
            map_task_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                entity: "task",
                id: id.to_string(),
            },
            other => other.into(),
        })?;
    task.depends_on = load_deps(conn, id)?;
    Ok(task)
}

/// Depth-first reachability over `task_deps`, used for cycle detection.
fn reaches(conn: &Connection, from: &str, target: &str) -> Result<bool, StoreError> {
    let mut stack = vec![from.to_string()];
    let mut seen = HashSet::new();
    while let Some(current) = stack.pop() {
        if current == target {
            return Ok(true);
        }
        if !seen.insert(current.clone()) {
            continue;
        }
        for dep in load_deps(conn, &current)? {
            stack.push(dep);
        }
    }
    Ok(false)
}

impl StateStore {
    pub fn create_task(&self, workspace_id: &str, new: &NewTask) -> Result<Task, StoreError> {
        let id = util::new_id();
        let created_at = util::now_iso();
        let complexity = new.complexity.unwrap_or(2).clamp(1, 5);
        let workspace_id = workspace_id.to_string();
        let new = new.clone();

        self.with_tx(move |tx| {
            let task_number: i64 = tx.query_row(
                "SELECT COALESCE(MAX(task_number), 0) + 1 FROM tasks WHERE workspace_id = ?1",
                params![workspace_id],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO tasks (id, workspace_id, task_number, title, description, status,
                                    priority, complexity, assignee_hint, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'BACKLOG', ?6, ?7, ?8, ?9)",
                params![
                    id,
                    workspace_id,
                    task_number,
                    new.title,
                    new.description,
                    new.priority,
                    complexity as i64,
                    new.assignee_hint,
                    created_at
                ],
            )?;
            for dep in &new.depends_on {
                insert_dependency(tx, &id, dep)?;
            }
            get_task_inner(tx, &id)
        })
    }

    pub fn get_task(&self, id: &str) -> Result<Task, StoreError> {
        self.with_conn(|conn| get_task_inner(conn, id))
    }

    /// Resolve a task by its per-workspace number (the id the CLI shows).
    pub fn get_task_by_number(
        &self,
        workspace_id: &str,
        number: i64,
    ) -> Result<Task, StoreError> {
        self.with_conn(|conn| {
            let id: String = conn
                .query_row(
                    "SELECT id FROM tasks WHERE workspace_id = ?1 AND task_number = ?2",
                    params![workspace_id, number],
                    |row| row.get(0),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                        entity: "task",
                        id: number.to_string(),
                    },
                    other => other.into(),
                })?;
            get_task_inner(conn, &id)
        })
    }

    pub fn list_tasks(
        &self,
        workspace_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, StoreError> {
        self.with_conn(|conn| {
            let mut tasks = match status {
                Some(s) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {TASK_COLUMNS} FROM tasks
                         WHERE workspace_id = ?1 AND status = ?2 ORDER BY task_number"
                    ))?;
                    let rows = stmt
                        .query_map(params![workspace_id, s.as_str()], map_task_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {TASK_COLUMNS} FROM tasks
                         WHERE workspace_id = ?1 ORDER BY task_number"
                    ))?;
                    let rows = stmt
                        .query_map(params![workspace_id], map_task_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
            };
            for task in &mut tasks {
                task.depends_on = load_deps(conn, &task.id)?;
            }
            Ok(tasks)
        })
    }

    /// Transition a task, enforcing the transition table and the dependency
    /// gate for IN_PROGRESS. Same-status writes are accepted as no-ops so
    /// repeated `set status` commands are idempotent.
    pub fn set_task_status(&self, id: &str, to: TaskStatus) -> Result<Task, StoreError> {
        self.with_tx(move |tx| {
            let task = get_task_inner(tx, id)?;
            task.status.check_transition(to)?;
            if task.status == to {
                return Ok(task);
            }

            if to == TaskStatus::InProgress {
                for dep_id in &task.depends_on {
                    let dep = get_task_inner(tx, dep_id)?;
                    if !dep.status.satisfies_dependency() {
                        return Err(StoreError::DependencyNotSatisfied {
                            task_id: id.to_string(),
                            dependency_id: dep_id.clone(),
                        });
                    }
                }
            }

            let completed_at: Option<String> = if to.is_terminal() {
                task.completed_at.clone().or_else(|| Some(util::now_iso()))
            } else {
                None
            };
            tx.execute(
                "UPDATE tasks SET status = ?1, completed_at = ?2 WHERE id = ?3",
                params![to.as_str(), completed_at, id],
            )?;
            get_task_inner(tx, id)
        })
    }

    pub fn set_task_result(&self, id: &str, summary: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE tasks SET result_summary = ?1 WHERE id = ?2",
                params![summary, id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    entity: "task",
                    id: id.to_string(),
                });
            }
            Ok(())
        })
    }

    /// Add a dependency edge, rejecting cross-workspace edges and cycles.
    pub fn add_dependency(&self, task_id: &str, depends_on_id: &str) -> Result<(), StoreError> {
        self.with_tx(move |tx| insert_dependency(tx, task_id, depends_on_id))
    }

    /// Replace all dependency edges for a task (used when a batch persists
    /// an inferred dependency map).
    pub fn set_dependencies(&self, task_id: &str, deps: &[String]) -> Result<(), StoreError> {
        let deps = deps.to_vec();
        self.with_tx(move |tx| {
            tx.execute("DELETE FROM task_deps WHERE task_id = ?1", params![task_id])?;
            for dep in &deps {
                insert_dependency(tx, task_id, dep)?;
            }
            Ok(())
        })
    }
}

fn insert_dependency(
    conn: &Connection,
    task_id: &str,
    depends_on_id: &str,
) -> Result<(), StoreError> {
    if task_id == depends_on_id {
        return Err(StoreError::DependencyCycle {
            task_id: task_id.to_string(),
        });
    }
    let task = get_task_inner(conn, task_id)?;
    let dep = get_task_inner(conn, depends_on_id)?;
    if task.workspace_id != dep.workspace_id {
        return Err(StoreError::Integrity(format!(
            "dependency {depends_on_id} is in another workspace"
        )));
    }
    if reaches(conn, depends_on_id, task_id)? {
        return Err(StoreError::DependencyCycle {
            task_id: task_id.to_string(),
        });
    }
    conn.execute(
        "INSERT OR IGNORE INTO task_deps (task_id, depends_on_id) VALUES (?1, ?2)",
        params![task_id, depends_on_id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_workspace() -> (StateStore, String) {
        let store = StateStore::open_in_memory().unwrap();
        let ws = store.create_workspace("/repo").unwrap();
        (store, ws.id)
    }

    fn task(store: &StateStore, ws: &str, title: &str) -> Task {
        store
            .create_task(
                ws,
                &NewTask {
                    title: title.to_string(),
                    ..Default::default()
                },
            )
            .unwrap()
    }

    #[test]
    fn create_assigns_monotonic_task_numbers() {
        let (store, ws) = store_with_workspace();
        let a = task(&store, &ws, "a");
        let b = task(&store, &ws, "b");
        assert_eq!(a.task_number, 1);
        assert_eq!(b.task_number, 2);
        assert_eq!(a.status, TaskStatus::Backlog);
        assert_eq!(a.complexity, 2);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let (store, ws) = store_with_workspace();
        let t = task(&store, &ws, "a");
        let err = store.set_task_status(&t.id, TaskStatus::Done).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[test]
    fn set_status_twice_is_idempotent() {
        let (store, ws) = store_with_workspace();
        let t = task(&store, &ws, "a");
        store.set_task_status(&t.id, TaskStatus::Ready).unwrap();
        let again = store.set_task_status(&t.id, TaskStatus::Ready).unwrap();
        assert_eq!(again.status, TaskStatus::Ready);
    }

    #[test]
    fn completed_at_tracks_terminal_states() {
        let (store, ws) = store_with_workspace();
        let t = task(&store, &ws, "a");
        store.set_task_status(&t.id, TaskStatus::Ready).unwrap();
        store.set_task_status(&t.id, TaskStatus::InProgress).unwrap();
        let failed = store.set_task_status(&t.id, TaskStatus::Failed).unwrap();
        assert!(failed.completed_at.is_some());

        // Retry clears the completion timestamp.
        let retried = store.set_task_status(&t.id, TaskStatus::Ready).unwrap();
        assert!(retried.completed_at.is_none());
    }

    #[test]
    fn in_progress_requires_satisfied_dependencies() {
        let (store, ws) = store_with_workspace();
        let dep = task(&store, &ws, "dep");
        let t = task(&store, &ws, "t");
        store.add_dependency(&t.id, &dep.id).unwrap();

        store.set_task_status(&t.id, TaskStatus::Ready).unwrap();
        let err = store
            .set_task_status(&t.id, TaskStatus::InProgress)
            .unwrap_err();
        assert!(matches!(err, StoreError::DependencyNotSatisfied { .. }));

        // Complete the dependency, then the transition is allowed.
        store.set_task_status(&dep.id, TaskStatus::Ready).unwrap();
        store.set_task_status(&dep.id, TaskStatus::InProgress).unwrap();
        store.set_task_status(&dep.id, TaskStatus::Done).unwrap();
        store.set_task_status(&t.id, TaskStatus::InProgress).unwrap();
    }

    #[test]
    fn dependency_cycles_are_rejected() {
        let (store, ws) = store_with_workspace();
        let a = task(&store, &ws, "a");
        let b = task(&store, &ws, "b");
        let c = task(&store, &ws, "c");
        store.add_dependency(&b.id, &a.id).unwrap();
        store.add_dependency(&c.id, &b.id).unwrap();

        let err = store.add_dependency(&a.id, &c.id).unwrap_err();
        assert!(matches!(err, StoreError::DependencyCycle { .. }));

        let err = store.add_dependency(&a.id, &a.id).unwrap_err();
        assert!(matches!(err, StoreError::DependencyCycle { .. }));
    }

    #[test]
    fn list_filters_by_status() {
        let (store, ws) = store_with_workspace();
        let a = task(&store, &ws, "a");
        task(&store, &ws, "b");
        store.set_task_status(&a.id, TaskStatus::Ready).unwrap();

        let ready = store.list_tasks(&ws, Some(TaskStatus::Ready)).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, a.id);

        let all = store.list_tasks(&ws, None).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn get_by_number_resolves() {
        let (store, ws) = store_with_workspace();
        let a = task(&store, &ws, "a");
        let found = store.get_task_by_number(&ws, 1).unwrap();
        assert_eq!(found.id, a.id);
        let missing = store.get_task_by_number(&ws, 99).unwrap_err();
        assert!(matches!(missing, StoreError::NotFound { .. }));
    }
}
