//! In-memory task store
//!
//! Tasks live in a `DashMap`. Every mutation of one task goes through the
//! map's per-key write guard, so concurrent updates to the same id are
//! serialised and the lifecycle check and the write happen atomically.

use std::sync::atomic::{AtomicU64, Ordering};

use agora_types::{
    AgentId, Message, Metadata, Task, TaskFilter, TaskId, TaskPage, TaskState, TaskStatus,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::error::StoreError;

/// A task plus its creation sequence number (tie-breaker for ordering)
#[derive(Debug, Clone)]
struct StoredTask {
    task: Task,
    sequence: u64,
}

/// Concurrency-safe map from task id to task record
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: DashMap<TaskId, StoredTask>,
    sequence: AtomicU64,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a task owned by `agent_id`.
    ///
    /// The id is generated here and is never reused while the store lives.
    pub fn create(
        &self,
        agent_id: &AgentId,
        message: Option<Message>,
        initial_state: TaskState,
    ) -> Task {
        self.create_with_metadata(agent_id, message, initial_state, Metadata::new())
    }

    pub fn create_with_metadata(
        &self,
        agent_id: &AgentId,
        message: Option<Message>,
        initial_state: TaskState,
        metadata: Metadata,
    ) -> Task {
        self.insert_new(agent_id, initial_state, metadata, |_| message)
    }

    /// Create a task whose message is built from its freshly generated id.
    ///
    /// The record is inserted complete, so no reader ever sees it without
    /// its message.
    pub fn create_with<F>(&self, agent_id: &AgentId, initial_state: TaskState, message: F) -> Task
    where
        F: FnOnce(&TaskId) -> Option<Message>,
    {
        self.insert_new(agent_id, initial_state, Metadata::new(), message)
    }

    fn insert_new<F>(&self, agent_id: &AgentId, initial_state: TaskState, metadata: Metadata, message: F) -> Task
    where
        F: FnOnce(&TaskId) -> Option<Message>,
    {
        let now = Utc::now();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        loop {
            let id = TaskId::generate();
            if let Entry::Vacant(slot) = self.tasks.entry(id.clone()) {
                let mut status = TaskStatus::new(initial_state);
                status.message = message(&id);
                let task = Task {
                    id,
                    agent_id: agent_id.clone(),
                    status,
                    created_at: now,
                    updated_at: now,
                    metadata,
                };
                slot.insert(StoredTask {
                    task: task.clone(),
                    sequence,
                });
                debug!(task_id = %task.id, agent_id = %agent_id, state = %initial_state, "Task created");
                return task;
            }
        }
    }

    pub fn get(&self, id: &TaskId) -> Result<Task, StoreError> {
        self.tasks
            .get(id)
            .map(|stored| stored.task.clone())
            .ok_or_else(|| StoreError::NotFound {
                task_id: id.clone(),
            })
    }

    /// Apply `mutator` to the task's status atomically.
    ///
    /// The mutator runs on a copy; the copy is committed, and `updated_at`
    /// refreshed, only if the resulting state is a legal transition. The
    /// mutator runs while the entry is locked and must not call back into
    /// the store.
    pub fn update<F>(&self, id: &TaskId, mutator: F) -> Result<Task, StoreError>
    where
        F: FnOnce(&mut TaskStatus),
    {
        let mut stored = self.tasks.get_mut(id).ok_or_else(|| StoreError::NotFound {
            task_id: id.clone(),
        })?;

        let current = stored.task.status.state;
        if current.is_terminal() {
            return Err(StoreError::TerminalState {
                task_id: id.clone(),
                state: current,
            });
        }

        let mut next = stored.task.status.clone();
        mutator(&mut next);

        if !current.can_transition_to(next.state) {
            return Err(StoreError::IllegalTransition {
                task_id: id.clone(),
                from: current,
                to: next.state,
            });
        }
        next.progress = next.progress.map(|p| p.clamp(0.0, 1.0));

        stored.task.status = next;
        stored.task.updated_at = Utc::now();
        Ok(stored.task.clone())
    }

    /// Move a live task to Completed with `reply` as its status message
    pub fn complete(&self, id: &TaskId, reply: Message) -> Result<Task, StoreError> {
        self.update(id, |status| {
            status.state = TaskState::Completed;
            status.message = Some(reply);
            status.error = None;
            status.progress = Some(1.0);
        })
    }

    /// Move a live task to Failed with `error` as the failure description
    pub fn fail(&self, id: &TaskId, error: impl Into<String>) -> Result<Task, StoreError> {
        let error = error.into();
        self.update(id, |status| {
            status.state = TaskState::Failed;
            status.error = Some(error);
        })
    }

    /// Cancel a live task.
    ///
    /// Cancelling a task that is already terminal is not an error: the task
    /// is returned unchanged.
    pub fn cancel(&self, id: &TaskId) -> Result<Task, StoreError> {
        let mut stored = self.tasks.get_mut(id).ok_or_else(|| StoreError::NotFound {
            task_id: id.clone(),
        })?;

        if stored.task.status.state.is_terminal() {
            return Ok(stored.task.clone());
        }

        stored.task.status.state = TaskState::Cancelled;
        stored.task.updated_at = Utc::now();
        debug!(task_id = %id, "Task cancelled");
        Ok(stored.task.clone())
    }

    /// One page of tasks matching `filter`, newest first.
    ///
    /// `total` counts every match before pagination.
    pub fn list(&self, filter: &TaskFilter) -> TaskPage {
        let mut matches: Vec<StoredTask> = self
            .tasks
            .iter()
            .filter(|entry| {
                let task = &entry.task;
                filter.agent_id.as_ref().map_or(true, |a| &task.agent_id == a)
                    && filter.state.map_or(true, |s| task.status.state == s)
            })
            .map(|entry| entry.value().clone())
            .collect();

        matches.sort_by(|a, b| {
            b.task
                .created_at
                .cmp(&a.task.created_at)
                .then(b.sequence.cmp(&a.sequence))
        });

        let total = matches.len();
        let tasks = matches
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .map(|stored| stored.task)
            .collect();

        TaskPage {
            tasks,
            total,
            limit: filter.limit,
            offset: filter.offset,
        }
    }

    /// Forget a task
    pub fn remove(&self, id: &TaskId) -> Option<Task> {
        self.tasks.remove(id).map(|(_, stored)| stored.task)
    }

    /// Forget terminal tasks last updated more than `older_than` ago.
    /// Returns how many were removed.
    pub fn purge_terminal(&self, older_than: Duration) -> usize {
        let cutoff: DateTime<Utc> = Utc::now() - older_than;
        let before = self.tasks.len();
        self.tasks
            .retain(|_, stored| !(stored.task.is_terminal() && stored.task.updated_at <= cutoff));
        before.saturating_sub(self.tasks.len())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn agent() -> AgentId {
        AgentId::from("seller")
    }

    #[test]
    fn test_create_and_get() {
        let store = TaskStore::new();
        let task = store.create(&agent(), Some(Message::buyer_text("hi")), TaskState::Working);

        let fetched = store.get(&task.id).unwrap();
        assert_eq!(fetched, task);
        assert_eq!(fetched.agent_id, agent());
        assert_eq!(fetched.created_at, fetched.updated_at);
    }

    #[test]
    fn test_create_with_stamps_message_with_new_id() {
        let store = TaskStore::new();
        let task = store.create_with(&agent(), TaskState::Working, |id| {
            Some(Message::buyer_text("hi").in_task(id.clone()))
        });

        let stored = store.get(&task.id).unwrap();
        let message = stored.status.message.unwrap();
        assert_eq!(message.task_id, Some(task.id.clone()));
        assert_eq!(message.text_content(), "hi");
        assert_eq!(stored.created_at, stored.updated_at);
    }

    #[test]
    fn test_get_unknown_task() {
        let store = TaskStore::new();
        let err = store.get(&TaskId::from("task_missing")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_update_refreshes_updated_at() {
        let store = TaskStore::new();
        let task = store.create(&agent(), None, TaskState::Working);
        std::thread::sleep(std::time::Duration::from_millis(2));

        let updated = store.update(&task.id, |s| s.progress = Some(0.5)).unwrap();
        assert!(updated.updated_at > task.updated_at);
        assert_eq!(updated.status.progress, Some(0.5));
    }

    #[test]
    fn test_progress_is_clamped() {
        let store = TaskStore::new();
        let task = store.create(&agent(), None, TaskState::Working);
        let updated = store.update(&task.id, |s| s.progress = Some(3.0)).unwrap();
        assert_eq!(updated.status.progress, Some(1.0));
    }

    #[test]
    fn test_terminal_task_is_frozen() {
        let store = TaskStore::new();
        let task = store.create(&agent(), None, TaskState::Working);
        store.complete(&task.id, Message::agent_text("done")).unwrap();

        let err = store
            .update(&task.id, |s| {
                s.state = TaskState::Failed;
                s.message = Some(Message::agent_text("overwritten"));
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::TerminalState { state: TaskState::Completed, .. }));

        let after = store.get(&task.id).unwrap();
        assert_eq!(after.state(), TaskState::Completed);
        assert_eq!(after.status.message.unwrap().text_content(), "done");
    }

    #[test]
    fn test_illegal_transition_is_not_committed() {
        let store = TaskStore::new();
        let task = store.create(&agent(), None, TaskState::Working);
        let err = store
            .update(&task.id, |s| {
                s.state = TaskState::Pending;
                s.error = Some("should not stick".to_string());
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));
        assert!(store.get(&task.id).unwrap().status.error.is_none());
    }

    #[test]
    fn test_cancel_terminal_task_is_a_noop() {
        let store = TaskStore::new();
        let task = store.create(&agent(), None, TaskState::Working);
        store.fail(&task.id, "boom").unwrap();

        let cancelled = store.cancel(&task.id).unwrap();
        assert_eq!(cancelled.state(), TaskState::Failed);
        assert_eq!(cancelled.status.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_cancel_live_task() {
        let store = TaskStore::new();
        let task = store.create(&agent(), None, TaskState::Pending);
        assert_eq!(store.cancel(&task.id).unwrap().state(), TaskState::Cancelled);
        assert!(store.complete(&task.id, Message::agent_text("late")).is_err());
    }

    #[test]
    fn test_concurrent_cancel_and_complete_yield_one_terminal_state() {
        for _ in 0..200 {
            let store = Arc::new(TaskStore::new());
            let task = store.create(&agent(), None, TaskState::Working);

            let s1 = Arc::clone(&store);
            let id1 = task.id.clone();
            let completer =
                std::thread::spawn(move || s1.complete(&id1, Message::agent_text("done")).is_ok());
            let s2 = Arc::clone(&store);
            let id2 = task.id.clone();
            let canceller = std::thread::spawn(move || s2.cancel(&id2).unwrap());

            let completed = completer.join().unwrap();
            let cancel_view = canceller.join().unwrap();
            let final_task = store.get(&task.id).unwrap();

            match final_task.state() {
                TaskState::Completed => {
                    assert!(completed);
                    assert!(final_task.status.message.is_some());
                }
                TaskState::Cancelled => {
                    assert!(!completed);
                    assert!(final_task.status.message.is_none());
                    assert_eq!(cancel_view.state(), TaskState::Cancelled);
                }
                other => panic!("unexpected state {other}"),
            }
        }
    }

    #[test]
    fn test_list_filters_by_agent_and_state() {
        let store = TaskStore::new();
        let other = AgentId::from("buyer");
        let a = store.create(&agent(), None, TaskState::Working);
        store.create(&other, None, TaskState::Working);
        store.complete(&a.id, Message::agent_text("ok")).unwrap();
        store.create(&agent(), None, TaskState::Working);

        let page = store.list(&TaskFilter {
            agent_id: Some(agent()),
            state: Some(TaskState::Completed),
            limit: 10,
            offset: 0,
        });
        assert_eq!(page.total, 1);
        assert_eq!(page.tasks[0].id, a.id);
    }

    #[test]
    fn test_remove_and_purge() {
        let store = TaskStore::new();
        let done = store.create(&agent(), None, TaskState::Working);
        let live = store.create(&agent(), None, TaskState::Working);
        store.complete(&done.id, Message::agent_text("ok")).unwrap();

        assert_eq!(store.purge_terminal(Duration::zero()), 1);
        assert!(store.get(&done.id).is_err());
        assert!(store.remove(&live.id).is_some());
        assert!(store.is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// For N tasks and limit L / offset O a page holds
        /// min(L, max(0, N - O)) tasks, newest first, and total = N
        #[test]
        fn prop_list_pagination(n in 0usize..40, limit in 0usize..50, offset in 0usize..50) {
            let store = TaskStore::new();
            for _ in 0..n {
                store.create(&agent(), None, TaskState::Working);
            }

            let page = store.list(&TaskFilter { agent_id: None, state: None, limit, offset });

            prop_assert_eq!(page.total, n);
            prop_assert_eq!(page.tasks.len(), limit.min(n.saturating_sub(offset)));
            for pair in page.tasks.windows(2) {
                prop_assert!(pair[0].created_at >= pair[1].created_at);
            }
        }
    }
}
