//! Blocker service: typed questions from the agent to a human, with async
//! resolution, expiry, and task unblocking.
//!
//! SYNC blockers halt the run (the runtime parks the task in BLOCKED until
//! every blocking question is answered); ASYNC blockers only annotate it.
//! Blockers idle past their expiry resolve themselves with a sentinel
//! answer so an unattended workspace keeps moving.

use crate::errors::StoreError;
use crate::events::{EventLog, EventType};
use crate::store::StateStore;
use crate::store::models::{
    Blocker, BlockerCategory, BlockerMode, BlockerStatus, TaskStatus,
};
use crate::util;
use std::sync::Arc;

pub const DEFAULT_EXPIRY_HOURS: i64 = 24;
/// Answer recorded on expiry; the agent treats it as permission to proceed.
pub const EXPIRED_ANSWER: &str = "expired — proceed with best judgment";

#[derive(Clone)]
pub struct BlockerService {
    store: Arc<StateStore>,
    events: EventLog,
    expiry_hours: i64,
}

impl BlockerService {
    pub fn new(store: Arc<StateStore>, events: EventLog) -> Self {
        Self {
            store,
            events,
            expiry_hours: DEFAULT_EXPIRY_HOURS,
        }
    }

    pub fn with_expiry_hours(mut self, hours: i64) -> Self {
        self.expiry_hours = hours;
        self
    }

    pub fn create(
        &self,
        task_id: &str,
        mode: BlockerMode,
        question: &str,
        context: &str,
        category: BlockerCategory,
    ) -> Result<Blocker, StoreError> {
        let blocker = self.store.create_blocker(
            task_id,
            mode,
            question,
            context,
            category,
            self.expiry_hours,
        )?;
        self.events.emit(
            EventType::BlockerCreated,
            task_id,
            serde_json::json!({
                "blocker_id": blocker.id,
                "mode": mode.as_str(),
                "category": category.as_str(),
                "question": question,
            }),
        )?;
        tracing::info!(task_id, blocker_id = %blocker.id, category = category.as_str(), "blocker created");
        Ok(blocker)
    }

    pub fn answer(&self, id: &str, text: &str) -> Result<Blocker, StoreError> {
        let blocker = self.store.set_blocker_answer(id, text)?;
        self.events.emit(
            EventType::BlockerAnswered,
            &blocker.task_id,
            serde_json::json!({ "blocker_id": id, "answer": text }),
        )?;
        self.maybe_unblock_task(&blocker.task_id)?;
        Ok(blocker)
    }

    pub fn resolve(&self, id: &str) -> Result<Blocker, StoreError> {
        let blocker = self.store.set_blocker_status(id, BlockerStatus::Resolved)?;
        self.events.emit(
            EventType::BlockerResolved,
            &blocker.task_id,
            serde_json::json!({ "blocker_id": id }),
        )?;
        self.maybe_unblock_task(&blocker.task_id)?;
        Ok(blocker)
    }

    /// Open blockers for the workspace, after sweeping expiry.
    pub fn list_open(&self, workspace_id: &str) -> Result<Vec<Blocker>, StoreError> {
        self.sweep_expired(workspace_id)?;
        self.store.list_open_blockers(workspace_id)
    }

    /// Answered or expired blockers carrying answers for a task, for the
    /// agent's context on resume.
    pub fn answered_for_task(&self, task_id: &str) -> Result<Vec<Blocker>, StoreError> {
        Ok(self
            .store
            .list_blockers_for_task(task_id)?
            .into_iter()
            .filter(|b| b.answer.is_some())
            .collect())
    }

    /// Expire OPEN blockers past their deadline, answering them with the
    /// sentinel and unblocking their tasks.
    pub fn sweep_expired(&self, workspace_id: &str) -> Result<usize, StoreError> {
        let now = util::now_iso();
        let mut expired = 0usize;
        for blocker in self.store.list_open_blockers(workspace_id)? {
            if blocker.expires_at <= now {
                self.store.set_blocker_answer(&blocker.id, EXPIRED_ANSWER)?;
                self.store
                    .set_blocker_status(&blocker.id, BlockerStatus::Expired)?;
                self.events.emit(
                    EventType::BlockerResolved,
                    &blocker.task_id,
                    serde_json::json!({ "blocker_id": blocker.id, "expired": true }),
                )?;
                self.maybe_unblock_task(&blocker.task_id)?;
                expired += 1;
            }
        }
        if expired > 0 {
            tracing::info!(workspace_id, expired, "expired idle blockers");
        }
        Ok(expired)
    }

    /// BLOCKED tasks with no remaining blocking questions go back to READY.
    fn maybe_unblock_task(&self, task_id: &str) -> Result<(), StoreError> {
        let task = self.store.get_task(task_id)?;
        if task.status != TaskStatus::Blocked {
            return Ok(());
        }
        let still_blocking = self
            .store
            .list_blockers_for_task(task_id)?
            .iter()
            .any(|b| b.status.is_blocking());
        if still_blocking {
            return Ok(());
        }
        self.store.set_task_status(task_id, TaskStatus::Ready)?;
        self.events.emit(
            EventType::TaskStatusChanged,
            task_id,
            serde_json::json!({ "from": "BLOCKED", "to": "READY", "reason": "blockers resolved" }),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tasks::NewTask;

    fn fixture() -> (BlockerService, Arc<StateStore>, String, String) {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
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
        let events = EventLog::new(store.clone(), ws.id.clone());
        let service = BlockerService::new(store.clone(), events);
        (service, store, ws.id, task.id)
    }

    fn block_task(store: &StateStore, task_id: &str) {
        store.set_task_status(task_id, TaskStatus::Ready).unwrap();
        store.set_task_status(task_id, TaskStatus::InProgress).unwrap();
        store.set_task_status(task_id, TaskStatus::Blocked).unwrap();
    }

    #[test]
    fn answering_last_blocker_unblocks_task() {
        let (service, store, _, task_id) = fixture();
        let blocker = service
            .create(
                &task_id,
                BlockerMode::Sync,
                "JWT or sessions?",
                "auth",
                BlockerCategory::AmbiguousSpec,
            )
            .unwrap();
        block_task(&store, &task_id);

        service.answer(&blocker.id, "JWT").unwrap();
        let task = store.get_task(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Ready);
    }

    #[test]
    fn task_stays_blocked_while_questions_remain() {
        let (service, store, _, task_id) = fixture();
        let first = service
            .create(&task_id, BlockerMode::Sync, "q1", "", BlockerCategory::MissingInfo)
            .unwrap();
        let second = service
            .create(&task_id, BlockerMode::Sync, "q2", "", BlockerCategory::MissingInfo)
            .unwrap();
        block_task(&store, &task_id);

        service.answer(&first.id, "a1").unwrap();
        assert_eq!(store.get_task(&task_id).unwrap().status, TaskStatus::Blocked);

        service.answer(&second.id, "a2").unwrap();
        assert_eq!(store.get_task(&task_id).unwrap().status, TaskStatus::Ready);
    }

    #[test]
    fn expiry_sweep_answers_with_sentinel() {
        let (service, store, ws, task_id) = fixture();
        let service = service.with_expiry_hours(0);
        let blocker = service
            .create(&task_id, BlockerMode::Sync, "q", "", BlockerCategory::MissingInfo)
            .unwrap();
        block_task(&store, &task_id);

        let expired = service.sweep_expired(&ws).unwrap();
        assert_eq!(expired, 1);

        let reloaded = store.get_blocker(&blocker.id).unwrap();
        assert_eq!(reloaded.status, BlockerStatus::Expired);
        assert_eq!(reloaded.answer.as_deref(), Some(EXPIRED_ANSWER));
        assert_eq!(store.get_task(&task_id).unwrap().status, TaskStatus::Ready);
        assert!(service.list_open(&ws).unwrap().is_empty());
    }

    #[test]
    fn answered_for_task_includes_expired_answers() {
        let (service, _store, ws, task_id) = fixture();
        let service = service.with_expiry_hours(0);
        service
            .create(&task_id, BlockerMode::Async, "q", "", BlockerCategory::TacticalDecision)
            .unwrap();
        service.sweep_expired(&ws).unwrap();

        let answered = service.answered_for_task(&task_id).unwrap();
        assert_eq!(answered.len(), 1);
        assert_eq!(answered[0].answer.as_deref(), Some(EXPIRED_ANSWER));
    }
}
