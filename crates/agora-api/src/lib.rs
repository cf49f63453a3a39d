//! Agora HTTP API
//!
//! Exposes every locally hosted agent over HTTP.
//!
//! ```text
//! POST /agents/:agent_id   JSON-RPC (message/send, tasks/get, tasks/cancel, tasks/list)
//! GET  /agents             registered agent ids
//! GET  /health             liveness, no secret required
//! ```
//!
//! Agent routes require the shared-secret header (default
//! `x-agora-secret`). A missing or empty header is answered with HTTP 401
//! and a JSON-RPC `UNAUTHORIZED` body.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use error::{ApiError, ApiResult};
pub use middleware::SecretAuth;
pub use state::AppState;

/// Default name of the shared-secret header
pub const DEFAULT_SECRET_HEADER: &str = "x-agora-secret";

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Enable CORS for browser clients
    pub enable_cors: bool,
    /// Allowed origins for CORS
    pub cors_origins: Vec<String>,
    pub enable_tracing: bool,
    pub secret_header: String,
    /// Exact secret to require; any non-empty value when unset
    pub secret: Option<String>,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enable_cors: true,
            cors_origins: vec!["*".to_string()],
            enable_tracing: true,
            secret_header: DEFAULT_SECRET_HEADER.to_string(),
            secret: None,
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

/// Create the router with all middleware
pub fn create_router(state: Arc<AppState>, config: ApiConfig) -> Router {
    let auth = Arc::new(SecretAuth {
        header: config.secret_header.to_lowercase(),
        expected: config.secret.clone().filter(|s| !s.is_empty()),
    });

    let mut router = Router::new()
        .route("/agents", get(handlers::list_agents))
        .route("/agents/:agent_id", post(handlers::agent_rpc))
        .route_layer(axum::middleware::from_fn_with_state(auth, middleware::require_secret))
        .route("/health", get(handlers::health_check))
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .with_state(state);

    if config.enable_tracing {
        router = router.layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let agent_id = request
                    .uri()
                    .path()
                    .strip_prefix("/agents/")
                    .unwrap_or("-")
                    .to_string();
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    agent_id = %agent_id,
                )
            }),
        );
    }

    if config.enable_cors {
        let cors = if config.cors_origins.iter().any(|o| o == "*") {
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
                .allow_origin(
                    config
                        .cors_origins
                        .iter()
                        .filter_map(|o| o.parse().ok())
                        .collect::<Vec<_>>(),
                )
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::OPTIONS])
                .allow_headers(Any)
        };
        router = router.layer(cors);
    }

    router
}
