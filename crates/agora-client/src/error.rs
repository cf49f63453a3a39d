//! Client error types

use agora_types::{AgentId, RpcError, TaskId};
use thiserror::Error;

/// Errors talking to another agent
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Agent {agent_id} answered with an error: {error}")]
    Rpc { agent_id: AgentId, error: RpcError },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status} from agent {agent_id}: {body}")]
    Http {
        agent_id: AgentId,
        status: u16,
        body: String,
    },

    /// The task was still live after every poll; distinct from a task that
    /// finished as Failed
    #[error("Task {task_id} did not finish after {attempts} polls")]
    Timeout { task_id: TaskId, attempts: u32 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No endpoint known for agent {0}")]
    UnknownAgent(AgentId),
}

impl ClientError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// JSON-RPC error code, when the remote answered with one
    pub fn rpc_code(&self) -> Option<i32> {
        match self {
            Self::Rpc { error, .. } => Some(error.code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors from an agent directory
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DirectoryError {
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}
