//! JSON-RPC task server
//!
//! `message/send` records a `Working` task and returns it at once. A
//! detached worker then runs the addressed agent's handler and writes the
//! terminal state back through the store. The other methods only read or
//! cancel.

use std::sync::Arc;
use std::time::Duration;

use agora_types::{
    methods, AgentId, JsonRpcRequest, JsonRpcResponse, Message, MessageSendParams, RequestId,
    Task, TaskFilter, TaskId, TaskIdParams, TaskListParams, TaskPage, TaskState, JSONRPC_VERSION,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{Result, ServerError, StoreError};
use crate::registry::HandlerRegistry;
use crate::store::TaskStore;

/// Task server tuning
#[derive(Debug, Clone)]
pub struct TaskServerConfig {
    /// Upper bound on one handler invocation
    pub handler_timeout: Duration,
    /// Page size used by `tasks/list` when the caller gives none
    pub default_page_size: usize,
    /// Largest page `tasks/list` will return
    pub max_page_size: usize,
}

impl Default for TaskServerConfig {
    fn default() -> Self {
        Self {
            handler_timeout: Duration::from_secs(120),
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

/// Serves the task protocol for every agent in the registry
#[derive(Debug)]
pub struct TaskServer {
    store: Arc<TaskStore>,
    registry: Arc<HandlerRegistry>,
    config: TaskServerConfig,
}

impl TaskServer {
    pub fn new(store: Arc<TaskStore>, registry: Arc<HandlerRegistry>, config: TaskServerConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &TaskServerConfig {
        &self.config
    }

    // ========================================================================
    // Typed operations
    // ========================================================================

    /// Create a `Working` task for `message` and schedule its processing.
    ///
    /// Must be called from within a tokio runtime. Returns as soon as the
    /// task is recorded.
    pub fn send_message(&self, agent_id: &AgentId, message: Message) -> Task {
        let task = self
            .store
            .create_with(agent_id, TaskState::Working, |id| Some(message.clone().in_task(id.clone())));
        let message = message.in_task(task.id.clone());

        info!(task_id = %task.id, agent_id = %agent_id, "Task accepted");
        self.spawn_worker(task.id.clone(), agent_id.clone(), message);
        task
    }

    pub fn get_task(&self, agent_id: &AgentId, id: &TaskId) -> Result<Task> {
        let task = self.store.get(id)?;
        if &task.agent_id != agent_id {
            return Err(ServerError::TaskNotFound { task_id: id.clone() });
        }
        Ok(task)
    }

    /// Cooperative cancel: an in-flight handler keeps running, but its
    /// result is dropped once the task is Cancelled.
    pub fn cancel_task(&self, agent_id: &AgentId, id: &TaskId) -> Result<Task> {
        self.get_task(agent_id, id)?;
        let task = self.store.cancel(id)?;
        info!(task_id = %id, agent_id = %agent_id, state = %task.state(), "Cancel requested");
        Ok(task)
    }

    pub fn list_tasks(&self, agent_id: &AgentId, params: TaskListParams) -> TaskPage {
        let limit = params
            .limit
            .unwrap_or(self.config.default_page_size)
            .min(self.config.max_page_size);
        self.store.list(&TaskFilter {
            agent_id: Some(agent_id.clone()),
            state: params.state,
            limit,
            offset: params.offset.unwrap_or(0),
        })
    }

    // ========================================================================
    // JSON-RPC entry points
    // ========================================================================

    /// Answer a decoded JSON-RPC request addressed to `agent_id`
    pub async fn handle(&self, agent_id: &AgentId, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();

        if request.jsonrpc != JSONRPC_VERSION {
            let err = ServerError::InvalidRequest(format!(
                "unsupported jsonrpc version '{}'",
                request.jsonrpc
            ));
            return JsonRpcResponse::failure(id, err.to_rpc_error());
        }

        match self.dispatch(agent_id, &request.method, request.params) {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => {
                debug!(agent_id = %agent_id, method = %request.method, error = %err, "Request failed");
                JsonRpcResponse::failure(id, err.to_rpc_error())
            }
        }
    }

    /// Answer an arbitrary JSON value, rejecting non-envelopes with
    /// INVALID_REQUEST
    pub async fn handle_value(&self, agent_id: &AgentId, value: Value) -> JsonRpcResponse {
        let id = value
            .get("id")
            .cloned()
            .and_then(|id| serde_json::from_value::<RequestId>(id).ok())
            .unwrap_or_default();

        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => self.handle(agent_id, request).await,
            Err(err) => {
                let err = ServerError::InvalidRequest(err.to_string());
                JsonRpcResponse::failure(id, err.to_rpc_error())
            }
        }
    }

    /// Answer a raw request body, rejecting non-JSON with PARSE_ERROR
    pub async fn handle_bytes(&self, agent_id: &AgentId, body: &[u8]) -> JsonRpcResponse {
        match serde_json::from_slice::<Value>(body) {
            Ok(value) => self.handle_value(agent_id, value).await,
            Err(err) => {
                let err = ServerError::Parse(err.to_string());
                JsonRpcResponse::failure(RequestId::Null, err.to_rpc_error())
            }
        }
    }

    fn dispatch(&self, agent_id: &AgentId, method: &str, params: Option<Value>) -> Result<Value> {
        match method {
            methods::MESSAGE_SEND => {
                let params: MessageSendParams = parse_params(params)?;
                let message = params
                    .message
                    .ok_or_else(|| ServerError::InvalidParams("missing 'message'".to_string()))?;
                to_result(&self.send_message(agent_id, message))
            }
            methods::TASKS_GET => {
                let params: TaskIdParams = parse_params(params)?;
                to_result(&self.get_task(agent_id, &params.id)?)
            }
            methods::TASKS_CANCEL => {
                let params: TaskIdParams = parse_params(params)?;
                to_result(&self.cancel_task(agent_id, &params.id)?)
            }
            methods::TASKS_LIST => {
                let params: TaskListParams = parse_params(params)?;
                to_result(&self.list_tasks(agent_id, params))
            }
            other => Err(ServerError::MethodNotFound {
                method: other.to_string(),
            }),
        }
    }

    // ========================================================================
    // Worker
    // ========================================================================

    /// One detached worker per message. The handler itself runs in a
    /// nested task so a panic surfaces as a `JoinError` instead of taking
    /// the worker down before it records the failure.
    fn spawn_worker(&self, task_id: TaskId, agent_id: AgentId, message: Message) {
        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.registry);
        let limit = self.config.handler_timeout;

        tokio::spawn(async move {
            let mut invocation = tokio::spawn({
                let agent_id = agent_id.clone();
                async move { registry.dispatch(&agent_id, message).await }
            });

            let outcome = match tokio::time::timeout(limit, &mut invocation).await {
                Ok(Ok(Ok(reply))) => Ok(reply),
                Ok(Ok(Err(err))) => Err(err.to_string()),
                Ok(Err(join_err)) if join_err.is_panic() => Err("handler panicked".to_string()),
                Ok(Err(_)) => Err("handler was aborted".to_string()),
                Err(_) => {
                    invocation.abort();
                    Err(format!("handler timed out after {}ms", limit.as_millis()))
                }
            };

            let written = match outcome {
                Ok(reply) => store.complete(&task_id, reply.in_task(task_id.clone())),
                Err(reason) => {
                    error!(task_id = %task_id, agent_id = %agent_id, error = %reason, "Handler failed");
                    store.fail(&task_id, reason)
                }
            };

            match written {
                Ok(task) => {
                    info!(task_id = %task_id, agent_id = %agent_id, state = %task.state(), "Task finished")
                }
                Err(StoreError::TerminalState { state, .. }) => {
                    debug!(task_id = %task_id, state = %state, "Task already terminal, result dropped")
                }
                Err(err) => warn!(task_id = %task_id, error = %err, "Could not record task result"),
            }
        });
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T> {
    let params = match params {
        Some(Value::Null) | None => Value::Object(Default::default()),
        Some(value) => value,
    };
    serde_json::from_value(params).map_err(|e| ServerError::InvalidParams(e.to_string()))
}

fn to_result<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| ServerError::Internal(e.to_string()))
}
