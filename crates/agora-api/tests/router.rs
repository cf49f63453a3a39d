//! API Router Tests
//!
//! Full request/response cycle through the router with an in-process task
//! server behind it.

use std::sync::Arc;
use std::time::Duration;

use agora_api::{create_router, ApiConfig, AppState};
use agora_tasks::{handler_fn, HandlerRegistry, TaskServer, TaskServerConfig, TaskStore};
use agora_types::{error_codes, AgentId, Message};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

const SECRET_HEADER: &str = "x-agora-secret";

fn create_test_router(config: ApiConfig) -> Router {
    let registry = Arc::new(HandlerRegistry::new());
    registry.register(
        AgentId::from("seller"),
        Arc::new(handler_fn(|message: Message, _agent: AgentId| async move {
            Ok(Message::agent_text(format!("seller heard: {}", message.text_content())))
        })),
    );
    let server = Arc::new(TaskServer::new(
        Arc::new(TaskStore::new()),
        registry,
        TaskServerConfig::default(),
    ));
    create_router(Arc::new(AppState::new(server)), config)
}

/// Make a request and decode the JSON response
async fn json_request(
    router: &Router,
    method: &str,
    uri: &str,
    secret: Option<&str>,
    body: Option<Body>,
) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(secret) = secret {
        request = request.header(SECRET_HEADER, secret);
    }
    let request = request.body(body.unwrap_or_else(Body::empty)).unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body_bytes).unwrap_or(json!(null));
    (status, json)
}

fn rpc(method: &str, params: Value, id: i64) -> Option<Body> {
    let envelope = json!({"jsonrpc": "2.0", "method": method, "params": params, "id": id});
    Some(Body::from(serde_json::to_vec(&envelope).unwrap()))
}

fn send(text: &str) -> Option<Body> {
    rpc(
        "message/send",
        json!({"message": serde_json::to_value(Message::buyer_text(text)).unwrap()}),
        1,
    )
}

// =============================================================================
// Public endpoints
// =============================================================================

#[cfg(test)]
mod public_endpoints {
    use super::*;

    #[tokio::test]
    async fn test_health_needs_no_secret() {
        let router = create_test_router(ApiConfig::default());
        let (status, json) = json_request(&router, "GET", "/health", None, None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["tasks"], 0);
    }
}

// =============================================================================
// Shared secret
// =============================================================================

#[cfg(test)]
mod secret {
    use super::*;

    #[tokio::test]
    async fn test_missing_secret_is_unauthorized() {
        let router = create_test_router(ApiConfig::default());
        let (status, json) = json_request(&router, "POST", "/agents/seller", None, send("hi")).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["code"], error_codes::UNAUTHORIZED);
        assert_eq!(json["jsonrpc"], "2.0");
    }

    #[tokio::test]
    async fn test_empty_secret_is_unauthorized() {
        let router = create_test_router(ApiConfig::default());
        let (status, _) = json_request(&router, "POST", "/agents/seller", Some(""), send("hi")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = json_request(&router, "GET", "/agents", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_configured_secret_must_match() {
        let router = create_test_router(ApiConfig {
            secret: Some("s3cret".to_string()),
            ..ApiConfig::default()
        });

        let (status, json) = json_request(&router, "POST", "/agents/seller", Some("guess"), send("hi")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["code"], error_codes::UNAUTHORIZED);

        let (status, _) = json_request(&router, "POST", "/agents/seller", Some("s3cret"), send("hi")).await;
        assert_eq!(status, StatusCode::OK);
    }
}

// =============================================================================
// JSON-RPC over HTTP
// =============================================================================

#[cfg(test)]
mod agent_rpc {
    use super::*;

    #[tokio::test]
    async fn test_send_then_poll() {
        let router = create_test_router(ApiConfig::default());

        let (status, json) = json_request(&router, "POST", "/agents/seller", Some("x"), send("hello")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["id"], 1);
        let task_id = json["result"]["id"].as_str().unwrap().to_string();

        let mut state = Value::Null;
        for _ in 0..100 {
            let (_, json) = json_request(
                &router,
                "POST",
                "/agents/seller",
                Some("x"),
                rpc("tasks/get", json!({"id": task_id}), 2),
            )
            .await;
            state = json["result"]["status"]["state"].clone();
            if state == "completed" {
                let parts = &json["result"]["status"]["message"]["parts"];
                assert_eq!(parts[0]["text"], "seller heard: hello");
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state, "completed");
    }

    #[tokio::test]
    async fn test_parse_error_is_in_band() {
        let router = create_test_router(ApiConfig::default());
        let (status, json) = json_request(
            &router,
            "POST",
            "/agents/seller",
            Some("x"),
            Some(Body::from("{not json")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["error"]["code"], error_codes::PARSE_ERROR);
        assert_eq!(json["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let router = create_test_router(ApiConfig::default());
        let (status, json) = json_request(
            &router,
            "POST",
            "/agents/seller",
            Some("x"),
            rpc("tasks/explode", json!({}), 7),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["error"]["code"], error_codes::METHOD_NOT_FOUND);
        assert_eq!(json["id"], 7);
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let router = create_test_router(ApiConfig::default());
        let (_, json) = json_request(
            &router,
            "POST",
            "/agents/seller",
            Some("x"),
            rpc("tasks/get", json!({"id": "task_missing"}), 3),
        )
        .await;
        assert_eq!(json["error"]["code"], error_codes::TASK_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let router = create_test_router(ApiConfig {
            max_body_size: 64,
            ..ApiConfig::default()
        });
        let (status, json) = json_request(&router, "POST", "/agents/seller", Some("x"), send(&"a".repeat(500))).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json["error"]["code"], error_codes::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_list_agents() {
        let router = create_test_router(ApiConfig::default());
        let (status, json) = json_request(&router, "GET", "/agents", Some("x"), None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["agents"], json!(["seller"]));
    }
}
