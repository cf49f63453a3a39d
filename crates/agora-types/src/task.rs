//! Tasks: the unit of asynchronous work behind every `message/send`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{AgentId, TaskId};
use crate::message::{Message, Metadata};

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Working,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Completed, Failed and Cancelled are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a task may move from `self` to `next`.
    ///
    /// Pending may start Working, any live state may finish, and a live
    /// state may be rewritten in place (progress updates). Nothing leaves a
    /// terminal state.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (TaskState::Pending, TaskState::Pending) => true,
            (TaskState::Pending, TaskState::Working) => true,
            (TaskState::Working, TaskState::Working) => true,
            (TaskState::Working, TaskState::Pending) => false,
            (_, to) => to.is_terminal(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Working => "working",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current status of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Fraction of work done, within `0.0..=1.0`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

impl TaskStatus {
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            message: None,
            result: None,
            error: None,
            progress: None,
        }
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }
}

/// A task record as owned by a task store
///
/// Callers only ever see snapshots; all mutation goes through the store so
/// that `updated_at` moves together with `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    /// The agent whose handler processes this task
    pub agent_id: AgentId,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Task {
    pub fn state(&self) -> TaskState {
        self.status.state
    }

    pub fn is_terminal(&self) -> bool {
        self.status.state.is_terminal()
    }

    /// The reply message of a completed task
    pub fn reply(&self) -> Option<&Message> {
        match self.status.state {
            TaskState::Completed => self.status.message.as_ref(),
            _ => None,
        }
    }
}

/// Filter for listing tasks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    /// Restrict to tasks owned by this agent
    pub agent_id: Option<AgentId>,
    pub state: Option<TaskState>,
    pub limit: usize,
    pub offset: usize,
}

/// One page of tasks, newest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    /// Number of tasks matching the filter before pagination
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TaskState; 5] = [
        TaskState::Pending,
        TaskState::Working,
        TaskState::Completed,
        TaskState::Failed,
        TaskState::Cancelled,
    ];

    #[test]
    fn test_terminal_states_never_transition() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn test_live_states_may_finish() {
        for from in [TaskState::Pending, TaskState::Working] {
            assert!(from.can_transition_to(TaskState::Completed));
            assert!(from.can_transition_to(TaskState::Failed));
            assert!(from.can_transition_to(TaskState::Cancelled));
        }
        assert!(TaskState::Pending.can_transition_to(TaskState::Working));
        assert!(!TaskState::Working.can_transition_to(TaskState::Pending));
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TaskState::Cancelled).unwrap(), "\"cancelled\"");
    }
}
