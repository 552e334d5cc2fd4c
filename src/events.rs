//! Append-only event log, layered on the state store (no separate file).
//!
//! Timestamps are strictly monotonic per workspace: an append that lands in
//! the same microsecond as its predecessor is bumped one microsecond past
//! it, inside the insert transaction. Consumers poll with `tail` using the
//! integer `seq` cursor; there is no push delivery.

use crate::errors::StoreError;
use crate::store::StateStore;
use crate::util;
use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Closed set of event types. Payload keys per type are append-only;
/// consumers must ignore unknown keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    WorkspaceInit,
    PrdAdded,
    PrdUpdated,
    TasksGenerated,
    TaskStatusChanged,
    RunStarted,
    AgentStepStarted,
    AgentStepCompleted,
    ToolCalled,
    FilesModified,
    GatesStarted,
    GatesCompleted,
    BlockerCreated,
    BlockerAnswered,
    BlockerResolved,
    CheckpointCreated,
    BatchStarted,
    BatchTaskStarted,
    BatchTaskCompleted,
    BatchTaskFailed,
    BatchCompleted,
    BatchCancelled,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::WorkspaceInit => "WORKSPACE_INIT",
            EventType::PrdAdded => "PRD_ADDED",
            EventType::PrdUpdated => "PRD_UPDATED",
            EventType::TasksGenerated => "TASKS_GENERATED",
            EventType::TaskStatusChanged => "TASK_STATUS_CHANGED",
            EventType::RunStarted => "RUN_STARTED",
            EventType::AgentStepStarted => "AGENT_STEP_STARTED",
            EventType::AgentStepCompleted => "AGENT_STEP_COMPLETED",
            EventType::ToolCalled => "TOOL_CALLED",
            EventType::FilesModified => "FILES_MODIFIED",
            EventType::GatesStarted => "GATES_STARTED",
            EventType::GatesCompleted => "GATES_COMPLETED",
            EventType::BlockerCreated => "BLOCKER_CREATED",
            EventType::BlockerAnswered => "BLOCKER_ANSWERED",
            EventType::BlockerResolved => "BLOCKER_RESOLVED",
            EventType::CheckpointCreated => "CHECKPOINT_CREATED",
            EventType::BatchStarted => "BATCH_STARTED",
            EventType::BatchTaskStarted => "BATCH_TASK_STARTED",
            EventType::BatchTaskCompleted => "BATCH_TASK_COMPLETED",
            EventType::BatchTaskFailed => "BATCH_TASK_FAILED",
            EventType::BatchCompleted => "BATCH_COMPLETED",
            EventType::BatchCancelled => "BATCH_CANCELLED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_uppercase()))
            .map_err(|_| StoreError::Integrity(format!("unknown event type '{s}'")))
    }
}

/// Immutable event record. `seq` is the tail cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: i64,
    pub id: String,
    pub workspace_id: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub subject_id: String,
    pub payload: serde_json::Value,
}

fn map_event_row(row: &Row) -> rusqlite::Result<Event> {
    let type_str: String = row.get(4)?;
    let payload_str: String = row.get(6)?;
    Ok(Event {
        seq: row.get(0)?,
        id: row.get(1)?,
        workspace_id: row.get(2)?,
        timestamp: row.get(3)?,
        event_type: EventType::from_str(&type_str).unwrap_or(EventType::WorkspaceInit),
        subject_id: row.get(5)?,
        payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
    })
}

const EVENT_COLUMNS: &str = "seq, id, workspace_id, timestamp, type, subject_id, payload";

/// Event log handle, cheaply cloneable.
#[derive(Clone)]
pub struct EventLog {
    store: Arc<StateStore>,
    workspace_id: String,
}

impl EventLog {
    pub fn new(store: Arc<StateStore>, workspace_id: String) -> Self {
        Self {
            store,
            workspace_id,
        }
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// Atomic append. The store assigns the timestamp, bumping past the
    /// previous event's when the clock has not advanced.
    pub fn emit(
        &self,
        event_type: EventType,
        subject_id: &str,
        payload: serde_json::Value,
    ) -> Result<Event, StoreError> {
        let id = util::new_id();
        let workspace_id = self.workspace_id.clone();
        let payload_str = payload.to_string();
        self.store.with_tx(move |tx| {
            let last: Option<String> = tx
                .query_row(
                    "SELECT MAX(timestamp) FROM events WHERE workspace_id = ?1",
                    params![workspace_id],
                    |row| row.get(0),
                )
                .unwrap_or(None);
            let timestamp = next_monotonic(last.as_deref());

            tx.execute(
                "INSERT INTO events (id, workspace_id, timestamp, type, subject_id, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    workspace_id,
                    timestamp,
                    event_type.as_str(),
                    subject_id,
                    payload_str
                ],
            )?;
            tx.query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                params![id],
                map_event_row,
            )
            .map_err(Into::into)
        })
    }

    /// Most recent `limit` events, oldest of them first.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<Event>, StoreError> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM (
                     SELECT {EVENT_COLUMNS} FROM events
                     WHERE workspace_id = ?1 ORDER BY seq DESC LIMIT ?2
                 ) ORDER BY seq"
            ))?;
            let events = stmt
                .query_map(params![self.workspace_id, limit as i64], map_event_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(events)
        })
    }

    /// Events strictly after `since_seq` (0 for the whole log). Returns the
    /// current tail; re-query with the last seq seen to restart.
    pub fn tail(&self, since_seq: i64) -> Result<Vec<Event>, StoreError> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM events
                 WHERE workspace_id = ?1 AND seq > ?2 ORDER BY seq"
            ))?;
            let events = stmt
                .query_map(params![self.workspace_id, since_seq], map_event_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(events)
        })
    }

    /// Events for a single subject (task or batch), oldest first.
    pub fn for_subject(&self, subject_id: &str) -> Result<Vec<Event>, StoreError> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM events
                 WHERE workspace_id = ?1 AND subject_id = ?2 ORDER BY seq"
            ))?;
            let events = stmt
                .query_map(params![self.workspace_id, subject_id], map_event_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(events)
        })
    }

    /// Current tail cursor (0 when the log is empty).
    pub fn cursor(&self) -> Result<i64, StoreError> {
        self.store.with_conn(|conn| {
            let seq: Option<i64> = conn
                .query_row(
                    "SELECT MAX(seq) FROM events WHERE workspace_id = ?1",
                    params![self.workspace_id],
                    |row| row.get(0),
                )
                .unwrap_or(None);
            Ok(seq.unwrap_or(0))
        })
    }

    /// Drop events after `cursor`. Only checkpoint restore may call this.
    pub fn truncate_after(&self, cursor: i64) -> Result<(), StoreError> {
        self.store.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM events WHERE workspace_id = ?1 AND seq > ?2",
                params![self.workspace_id, cursor],
            )?;
            Ok(())
        })
    }
}

/// Next timestamp, strictly greater than `last` when the wall clock ties.
fn next_monotonic(last: Option<&str>) -> String {
    let now = util::now_iso();
    match last {
        Some(prev) if now.as_str() <= prev => {
            let bumped = DateTime::parse_from_rfc3339(prev)
                .map(|t| t.with_timezone(&Utc) + chrono::Duration::microseconds(1))
                .unwrap_or_else(|_| Utc::now());
            util::format_iso(bumped)
        }
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> EventLog {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let ws = store.create_workspace("/repo").unwrap();
        EventLog::new(store, ws.id)
    }

    #[test]
    fn timestamps_strictly_increase() {
        let log = fixture();
        let mut last = String::new();
        for i in 0..50 {
            let event = log
                .emit(
                    EventType::ToolCalled,
                    "task-1",
                    serde_json::json!({"tool": "read_file", "n": i}),
                )
                .unwrap();
            assert!(event.timestamp > last, "timestamp not monotonic at {i}");
            last = event.timestamp;
        }
    }

    #[test]
    fn tail_after_last_cursor_is_empty() {
        let log = fixture();
        log.emit(EventType::WorkspaceInit, "ws", serde_json::json!({}))
            .unwrap();
        log.emit(EventType::PrdAdded, "prd-1", serde_json::json!({}))
            .unwrap();

        let all = log.tail(0).unwrap();
        assert_eq!(all.len(), 2);
        let last_seq = all.last().unwrap().seq;
        assert!(log.tail(last_seq).unwrap().is_empty());
    }

    #[test]
    fn tail_resumes_from_cursor() {
        let log = fixture();
        log.emit(EventType::RunStarted, "t1", serde_json::json!({}))
            .unwrap();
        let cursor = log.cursor().unwrap();
        log.emit(EventType::GatesStarted, "t1", serde_json::json!({}))
            .unwrap();

        let new = log.tail(cursor).unwrap();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].event_type, EventType::GatesStarted);
    }

    #[test]
    fn list_recent_caps_and_orders() {
        let log = fixture();
        for i in 0..10 {
            log.emit(
                EventType::AgentStepCompleted,
                "t1",
                serde_json::json!({"iteration": i}),
            )
            .unwrap();
        }
        let recent = log.list_recent(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent[0].seq < recent[1].seq && recent[1].seq < recent[2].seq);
        assert_eq!(recent[2].payload["iteration"], 9);
    }

    #[test]
    fn truncate_after_drops_newer_events() {
        let log = fixture();
        log.emit(EventType::WorkspaceInit, "ws", serde_json::json!({}))
            .unwrap();
        let cursor = log.cursor().unwrap();
        log.emit(EventType::CheckpointCreated, "cp", serde_json::json!({}))
            .unwrap();

        log.truncate_after(cursor).unwrap();
        assert_eq!(log.cursor().unwrap(), cursor);
        assert_eq!(log.tail(0).unwrap().len(), 1);
    }

    #[test]
    fn event_type_round_trips() {
        assert_eq!(
            "BATCH_TASK_FAILED".parse::<EventType>().unwrap(),
            EventType::BatchTaskFailed
        );
        assert_eq!(EventType::BatchTaskFailed.as_str(), "BATCH_TASK_FAILED");
        assert!("NOT_A_TYPE".parse::<EventType>().is_err());
    }
}
