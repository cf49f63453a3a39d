//! Task Server Protocol Tests
//!
//! Drives the server through its JSON-RPC entry points the way a remote
//! agent would: send, then poll until the task is terminal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use agora_tasks::{
    handler_fn, HandlerError, HandlerRegistry, MessageHandler, TaskServer, TaskServerConfig,
    TaskStore,
};
use agora_types::{error_codes, AgentId, JsonRpcResponse, Message, Task, TaskState};
use serde_json::{json, Value};

fn seller() -> AgentId {
    AgentId::from("seller")
}

fn server_with(handler: Option<Arc<dyn MessageHandler>>, config: TaskServerConfig) -> TaskServer {
    let registry = Arc::new(HandlerRegistry::new());
    if let Some(handler) = handler {
        registry.register(seller(), handler);
    }
    TaskServer::new(Arc::new(TaskStore::new()), registry, config)
}

fn slow_handler(delay: Duration) -> Arc<dyn MessageHandler> {
    Arc::new(handler_fn(move |message: Message, _agent: AgentId| async move {
        tokio::time::sleep(delay).await;
        Ok(Message::agent_text(format!("done: {}", message.text_content())))
    }))
}

async fn rpc(server: &TaskServer, agent: &AgentId, method: &str, params: Value) -> JsonRpcResponse {
    server
        .handle_value(
            agent,
            json!({"jsonrpc": "2.0", "method": method, "params": params, "id": 1}),
        )
        .await
}

fn task_of(response: JsonRpcResponse) -> Task {
    let value = response.into_result().expect("rpc succeeded");
    serde_json::from_value(value).expect("task payload")
}

async fn send(server: &TaskServer, text: &str) -> Task {
    let message = serde_json::to_value(Message::buyer_text(text)).unwrap();
    task_of(rpc(server, &seller(), "message/send", json!({ "message": message })).await)
}

async fn poll_terminal(server: &TaskServer, task: &Task) -> Task {
    for _ in 0..200 {
        let current = task_of(rpc(server, &seller(), "tasks/get", json!({"id": task.id})).await);
        if current.is_terminal() {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never finished", task.id);
}

fn error_code(response: &JsonRpcResponse) -> i32 {
    response.error.as_ref().map(|e| e.code).expect("rpc error")
}

// =============================================================================
// Protocol errors
// =============================================================================

mod protocol_errors {
    use super::*;

    #[tokio::test]
    async fn test_non_json_body_is_parse_error() {
        let server = server_with(None, TaskServerConfig::default());
        let response = server.handle_bytes(&seller(), b"{not json").await;
        assert_eq!(error_code(&response), error_codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_structurally_invalid_envelope() {
        let server = server_with(None, TaskServerConfig::default());
        let response = server
            .handle_value(&seller(), json!({"jsonrpc": "2.0", "method": 42, "id": "a"}))
            .await;
        assert_eq!(error_code(&response), error_codes::INVALID_REQUEST);
        assert_eq!(response.id, agora_types::RequestId::from("a"));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let server = server_with(None, TaskServerConfig::default());
        let response = rpc(&server, &seller(), "tasks/explode", json!({})).await;
        assert_eq!(error_code(&response), error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_send_without_message_is_invalid_params() {
        let server = server_with(None, TaskServerConfig::default());
        let response = rpc(&server, &seller(), "message/send", json!({})).await;
        assert_eq!(error_code(&response), error_codes::INVALID_PARAMS);
        assert!(server.store().is_empty());
    }

    #[tokio::test]
    async fn test_get_without_id_is_invalid_params() {
        let server = server_with(None, TaskServerConfig::default());
        let response = rpc(&server, &seller(), "tasks/get", json!({})).await;
        assert_eq!(error_code(&response), error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let server = server_with(None, TaskServerConfig::default());
        let response = rpc(&server, &seller(), "tasks/get", json!({"id": "task_nope"})).await;
        assert_eq!(error_code(&response), error_codes::TASK_NOT_FOUND);
        let response = rpc(&server, &seller(), "tasks/cancel", json!({"id": "task_nope"})).await;
        assert_eq!(error_code(&response), error_codes::TASK_NOT_FOUND);
    }
}

// =============================================================================
// Asynchronous processing
// =============================================================================

mod processing {
    use super::*;

    #[tokio::test]
    async fn test_send_returns_before_handler_finishes() {
        let server = server_with(
            Some(slow_handler(Duration::from_millis(300))),
            TaskServerConfig::default(),
        );

        let started = Instant::now();
        let task = send(&server, "hello").await;
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(task.state(), TaskState::Working);

        let finished = poll_terminal(&server, &task).await;
        assert_eq!(finished.state(), TaskState::Completed);
        let reply = finished.reply().expect("reply");
        assert_eq!(reply.text_content(), "done: hello");
        assert_eq!(reply.task_id.as_ref(), Some(&task.id));
    }

    #[tokio::test]
    async fn test_working_task_carries_its_request() {
        let server = server_with(
            Some(slow_handler(Duration::from_millis(300))),
            TaskServerConfig::default(),
        );

        let task = server.send_message(&seller(), Message::buyer_text("hello"));
        let request = task.status.message.as_ref().expect("request attached");
        assert_eq!(request.text_content(), "hello");
        assert_eq!(request.task_id.as_ref(), Some(&task.id));

        let fetched = server.get_task(&seller(), &task.id).unwrap();
        assert_eq!(fetched.state(), TaskState::Working);
        assert_eq!(fetched.status.message, task.status.message);
        assert_eq!(fetched.updated_at, fetched.created_at);
    }

    #[tokio::test]
    async fn test_unregistered_agent_gets_echo() {
        let server = server_with(None, TaskServerConfig::default());
        let task = send(&server, "ping").await;
        let finished = poll_terminal(&server, &task).await;
        assert_eq!(finished.reply().unwrap().text_content(), "Echo: ping");
    }

    #[tokio::test]
    async fn test_handler_error_becomes_failed_task() {
        let failing: Arc<dyn MessageHandler> =
            Arc::new(handler_fn(|_m: Message, _a: AgentId| async {
                Err(HandlerError::failed("oracle unavailable"))
            }));
        let server = server_with(Some(failing), TaskServerConfig::default());

        let task = send(&server, "hi").await;
        let finished = poll_terminal(&server, &task).await;
        assert_eq!(finished.state(), TaskState::Failed);
        assert_eq!(finished.status.error.as_deref(), Some("oracle unavailable"));
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_failed_task() {
        let panicking: Arc<dyn MessageHandler> =
            Arc::new(handler_fn(|_m: Message, _a: AgentId| async {
                if true {
                    panic!("boom");
                }
                Ok(Message::agent_text("unreachable"))
            }));
        let server = server_with(Some(panicking), TaskServerConfig::default());

        let task = send(&server, "hi").await;
        let finished = poll_terminal(&server, &task).await;
        assert_eq!(finished.state(), TaskState::Failed);
        assert_eq!(finished.status.error.as_deref(), Some("handler panicked"));
    }

    #[tokio::test]
    async fn test_handler_timeout_becomes_failed_task() {
        let server = server_with(
            Some(slow_handler(Duration::from_secs(5))),
            TaskServerConfig {
                handler_timeout: Duration::from_millis(50),
                ..TaskServerConfig::default()
            },
        );

        let task = send(&server, "hi").await;
        let finished = poll_terminal(&server, &task).await;
        assert_eq!(finished.state(), TaskState::Failed);
        assert!(finished.status.error.unwrap().contains("timed out"));
    }
}

// =============================================================================
// Cancellation
// =============================================================================

mod cancellation {
    use super::*;

    #[tokio::test]
    async fn test_cancel_wins_over_late_completion() {
        let server = server_with(
            Some(slow_handler(Duration::from_millis(100))),
            TaskServerConfig::default(),
        );
        let task = send(&server, "hi").await;

        let cancelled = task_of(rpc(&server, &seller(), "tasks/cancel", json!({"id": task.id})).await);
        assert_eq!(cancelled.state(), TaskState::Cancelled);

        tokio::time::sleep(Duration::from_millis(250)).await;
        let after = task_of(rpc(&server, &seller(), "tasks/get", json!({"id": task.id})).await);
        assert_eq!(after.state(), TaskState::Cancelled);
        assert!(after.reply().is_none());
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_noop() {
        let server = server_with(None, TaskServerConfig::default());
        let task = send(&server, "hi").await;
        let finished = poll_terminal(&server, &task).await;

        let response = rpc(&server, &seller(), "tasks/cancel", json!({"id": task.id})).await;
        let unchanged = task_of(response);
        assert_eq!(unchanged.state(), TaskState::Completed);
        assert_eq!(unchanged.status, finished.status);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_racing_completion_lands_once() {
        let server = Arc::new(server_with(
            Some(slow_handler(Duration::from_millis(1))),
            TaskServerConfig::default(),
        ));

        for _ in 0..50 {
            let task = send(&server, "race").await;
            let canceller = {
                let server = Arc::clone(&server);
                let id = task.id.clone();
                tokio::spawn(async move { server.cancel_task(&seller(), &id) })
            };
            tokio::time::sleep(Duration::from_millis(1)).await;
            canceller.await.unwrap().unwrap();

            let finished = poll_terminal(&server, &task).await;
            match finished.state() {
                TaskState::Completed => assert!(finished.reply().is_some()),
                TaskState::Cancelled => assert!(finished.status.error.is_none()),
                other => panic!("unexpected state {other}"),
            }

            tokio::time::sleep(Duration::from_millis(5)).await;
            let settled = server.get_task(&seller(), &task.id).unwrap();
            assert_eq!(settled.status, finished.status);
        }
    }
}

// =============================================================================
// Reads and listing
// =============================================================================

mod reads {
    use super::*;

    #[tokio::test]
    async fn test_get_is_idempotent() {
        let server = server_with(None, TaskServerConfig::default());
        let task = send(&server, "hi").await;
        poll_terminal(&server, &task).await;

        let first = rpc(&server, &seller(), "tasks/get", json!({"id": task.id})).await;
        let second = rpc(&server, &seller(), "tasks/get", json!({"id": task.id})).await;
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn test_tasks_are_scoped_to_their_agent() {
        let server = server_with(None, TaskServerConfig::default());
        let task = send(&server, "hi").await;

        let other = AgentId::from("buyer");
        let response = rpc(&server, &other, "tasks/get", json!({"id": task.id})).await;
        assert_eq!(error_code(&response), error_codes::TASK_NOT_FOUND);

        let page = rpc(&server, &other, "tasks/list", json!({})).await.into_result().unwrap();
        assert_eq!(page["total"], 0);
    }

    #[tokio::test]
    async fn test_list_pages_newest_first() {
        let server = server_with(None, TaskServerConfig::default());
        let mut sent = Vec::new();
        for i in 0..5 {
            sent.push(send(&server, &format!("m{i}")).await);
        }

        let page = rpc(&server, &seller(), "tasks/list", json!({"limit": 2, "offset": 1}))
            .await
            .into_result()
            .unwrap();
        assert_eq!(page["total"], 5);
        let ids: Vec<&str> = page["tasks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec![sent[3].id.as_str(), sent[2].id.as_str()]);
    }

    #[tokio::test]
    async fn test_list_filters_by_state() {
        let server = server_with(None, TaskServerConfig::default());
        let task = send(&server, "one").await;
        poll_terminal(&server, &task).await;

        let page = rpc(&server, &seller(), "tasks/list", json!({"state": "completed"}))
            .await
            .into_result()
            .unwrap();
        assert_eq!(page["total"], 1);
        let page = rpc(&server, &seller(), "tasks/list", json!({"state": "failed"}))
            .await
            .into_result()
            .unwrap();
        assert_eq!(page["total"], 0);
    }
}
