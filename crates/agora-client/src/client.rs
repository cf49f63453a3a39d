//! Polling client
//!
//! A synchronous-looking API over the asynchronous task protocol.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agora_types::{
    methods, AgentId, JsonRpcRequest, Message, MessageSendParams, Task, TaskId, TaskIdParams,
    TaskListParams, TaskPage,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::transport::RpcTransport;

/// How `wait_for_task` polls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollOptions {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl PollOptions {
    pub fn new(poll_interval: Duration, max_attempts: u32) -> Self {
        Self {
            poll_interval,
            max_attempts,
        }
    }

    /// Total time `wait_for_task` may spend
    pub fn deadline(&self) -> Duration {
        self.poll_interval * self.max_attempts
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_attempts: 60,
        }
    }
}

/// Client used by one agent to talk to others
pub struct AgentClient {
    transport: Arc<dyn RpcTransport>,
    next_id: AtomicI64,
}

impl AgentClient {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            transport,
            next_id: AtomicI64::new(1),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        target: &AgentId,
        method: &str,
        params: Value,
    ) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(method, params, id);
        let response = self.transport.call(target, request).await?;
        let result = response.into_result().map_err(|error| ClientError::Rpc {
            agent_id: target.clone(),
            error,
        })?;
        Ok(serde_json::from_value(result)?)
    }

    /// Issue `message/send`; returns the initial (Working) task
    pub async fn send_message(&self, target: &AgentId, message: Message) -> Result<Task> {
        let params = serde_json::to_value(MessageSendParams {
            message: Some(message),
        })?;
        self.call(target, methods::MESSAGE_SEND, params).await
    }

    pub async fn get_task(&self, target: &AgentId, id: &TaskId) -> Result<Task> {
        let params = serde_json::to_value(TaskIdParams { id: id.clone() })?;
        self.call(target, methods::TASKS_GET, params).await
    }

    pub async fn cancel_task(&self, target: &AgentId, id: &TaskId) -> Result<Task> {
        let params = serde_json::to_value(TaskIdParams { id: id.clone() })?;
        self.call(target, methods::TASKS_CANCEL, params).await
    }

    pub async fn list_tasks(&self, target: &AgentId, params: TaskListParams) -> Result<TaskPage> {
        self.call(target, methods::TASKS_LIST, serde_json::to_value(params)?)
            .await
    }

    /// Poll `tasks/get` until the task is terminal.
    ///
    /// Fails with [`ClientError::Timeout`] once `max_attempts` polls have
    /// seen a live task or the overall deadline has passed.
    pub async fn wait_for_task(
        &self,
        id: &TaskId,
        target: &AgentId,
        options: PollOptions,
    ) -> Result<Task> {
        let deadline = Instant::now() + options.deadline();
        let timeout = |attempts: u32| ClientError::Timeout {
            task_id: id.clone(),
            attempts,
        };

        for attempt in 1..=options.max_attempts {
            let task = tokio::time::timeout_at(deadline, self.get_task(target, id))
                .await
                .map_err(|_| timeout(attempt))??;
            if task.is_terminal() {
                return Ok(task);
            }
            debug!(task_id = %id, agent_id = %target, attempt, state = %task.state(), "Task still running");

            if attempt == options.max_attempts {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(timeout(attempt));
            }
            tokio::time::sleep(options.poll_interval.min(deadline - now)).await;
        }

        Err(timeout(options.max_attempts))
    }

    /// `send_message` followed by `wait_for_task`
    pub async fn send_and_wait(
        &self,
        target: &AgentId,
        message: Message,
        options: PollOptions,
    ) -> Result<Task> {
        let task = self.send_message(target, message).await?;
        if task.is_terminal() {
            return Ok(task);
        }
        self.wait_for_task(&task.id, target, options).await
    }
}

impl std::fmt::Debug for AgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentClient").finish_non_exhaustive()
    }
}
