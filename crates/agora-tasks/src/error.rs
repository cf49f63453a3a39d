//! Error types for the task protocol

use agora_types::{error_codes, RpcError, TaskId, TaskState};
use thiserror::Error;

/// Errors returned by the task store. The store never swallows state: every
/// rejected operation is reported back to the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Task {task_id} not found")]
    NotFound { task_id: TaskId },

    #[error("Task {task_id} is already {state} and cannot change")]
    TerminalState { task_id: TaskId, state: TaskState },

    #[error("Task {task_id} cannot move from {from} to {to}")]
    IllegalTransition {
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
    },
}

/// Errors raised by message handlers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandlerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Protocol-level faults, each with a distinct JSON-RPC code
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServerError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: TaskId },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// JSON-RPC error code for this fault
    pub fn error_code(&self) -> i32 {
        match self {
            Self::Parse(_) => error_codes::PARSE_ERROR,
            Self::InvalidRequest(_) => error_codes::INVALID_REQUEST,
            Self::MethodNotFound { .. } => error_codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => error_codes::INVALID_PARAMS,
            Self::TaskNotFound { .. } => error_codes::TASK_NOT_FOUND,
            Self::Unauthorized => error_codes::UNAUTHORIZED,
            Self::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }

    pub fn to_rpc_error(&self) -> RpcError {
        RpcError::new(self.error_code(), self.to_string())
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { task_id } => Self::TaskNotFound { task_id },
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<&ServerError> for RpcError {
    fn from(err: &ServerError) -> Self {
        err.to_rpc_error()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_kinds_have_distinct_codes() {
        let errors = [
            ServerError::Parse("x".into()),
            ServerError::InvalidRequest("x".into()),
            ServerError::MethodNotFound { method: "x".into() },
            ServerError::InvalidParams("x".into()),
            ServerError::TaskNotFound { task_id: TaskId::from("t") },
            ServerError::Unauthorized,
            ServerError::Internal("x".into()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(ServerError::error_code).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_store_not_found_maps_to_task_not_found() {
        let err: ServerError = StoreError::NotFound { task_id: TaskId::from("t1") }.into();
        assert_eq!(err.error_code(), error_codes::TASK_NOT_FOUND);
    }
}
