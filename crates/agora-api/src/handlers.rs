//! Route handlers

use std::sync::Arc;

use agora_types::{AgentId, JsonRpcResponse};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, Path, State},
    Json,
};
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: i64,
    /// Tasks currently held by the store
    pub tasks: usize,
}

#[derive(Debug, Serialize)]
pub struct AgentsResponse {
    pub agents: Vec<AgentId>,
}

/// Liveness; never requires the shared secret
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().timestamp_millis(),
        tasks: state.server.store().len(),
    })
}

pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<AgentsResponse> {
    Json(AgentsResponse {
        agents: state.server.registry().agent_ids(),
    })
}

/// JSON-RPC endpoint of one agent.
///
/// The raw body goes to the task server so that parse and envelope errors
/// are answered in-band with HTTP 200.
pub async fn agent_rpc(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<Json<JsonRpcResponse>> {
    let body = body.map_err(|rejection| ApiError::Body {
        status: rejection.status(),
        message: rejection.body_text(),
    })?;
    let agent_id = AgentId::from(agent_id);
    Ok(Json(state.server.handle_bytes(&agent_id, &body).await))
}
