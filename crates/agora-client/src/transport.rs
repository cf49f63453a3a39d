//! RPC transports
//!
//! A transport delivers one JSON-RPC request to one agent and returns the
//! envelope it answered with. RPC-level errors stay inside the envelope;
//! only delivery problems become [`ClientError`]s.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agora_tasks::TaskServer;
use agora_types::{AgentId, JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use tracing::debug;

use crate::error::{ClientError, Result};

/// Header carrying the shared secret, unless configured otherwise
pub const DEFAULT_SECRET_HEADER: &str = "x-agora-secret";

#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, agent_id: &AgentId, request: JsonRpcRequest) -> Result<JsonRpcResponse>;
}

// ============================================================================
// In-process
// ============================================================================

/// Hands requests straight to a task server in the same process
#[derive(Debug, Clone)]
pub struct LocalTransport {
    server: Arc<TaskServer>,
}

impl LocalTransport {
    pub fn new(server: Arc<TaskServer>) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &Arc<TaskServer> {
        &self.server
    }

    pub fn serves(&self, agent_id: &AgentId) -> bool {
        self.server.registry().is_registered(agent_id)
    }
}

#[async_trait]
impl RpcTransport for LocalTransport {
    async fn call(&self, agent_id: &AgentId, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        Ok(self.server.handle(agent_id, request).await)
    }
}

// ============================================================================
// HTTP
// ============================================================================

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Per-request timeout
    pub timeout: Duration,
    pub secret_header: String,
    pub secret: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            secret_header: DEFAULT_SECRET_HEADER.to_string(),
            secret: String::new(),
        }
    }
}

/// Posts requests to remote agent endpoints
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    endpoints: RwLock<HashMap<AgentId, String>>,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoints: RwLock::new(HashMap::new()),
            config,
        })
    }

    /// Map `agent_id` to the full URL of its JSON-RPC endpoint
    pub fn register_endpoint(&self, agent_id: AgentId, endpoint: impl Into<String>) {
        self.endpoints.write().insert(agent_id, endpoint.into());
    }

    pub fn endpoint(&self, agent_id: &AgentId) -> Option<String> {
        self.endpoints.read().get(agent_id).cloned()
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn call(&self, agent_id: &AgentId, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let url = self
            .endpoint(agent_id)
            .ok_or_else(|| ClientError::UnknownAgent(agent_id.clone()))?;

        debug!(agent_id = %agent_id, method = %request.method, url = %url, "Posting RPC request");
        let resp = self
            .client
            .post(&url)
            .header(self.config.secret_header.as_str(), self.config.secret.as_str())
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;

        // Servers answer auth failures with a JSON-RPC body too; prefer it.
        match serde_json::from_slice::<JsonRpcResponse>(&body) {
            Ok(envelope) => Ok(envelope),
            Err(_) if !status.is_success() => Err(ClientError::Http {
                agent_id: agent_id.clone(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            }),
            Err(err) => Err(ClientError::Serialization(err)),
        }
    }
}

// ============================================================================
// Routing
// ============================================================================

/// Local when the agent is hosted in this process, HTTP otherwise
#[derive(Debug)]
pub struct RoutingTransport {
    local: LocalTransport,
    remote: HttpTransport,
}

impl RoutingTransport {
    pub fn new(local: LocalTransport, remote: HttpTransport) -> Self {
        Self { local, remote }
    }

    pub fn remote(&self) -> &HttpTransport {
        &self.remote
    }
}

#[async_trait]
impl RpcTransport for RoutingTransport {
    async fn call(&self, agent_id: &AgentId, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        if self.local.serves(agent_id) {
            self.local.call(agent_id, request).await
        } else {
            self.remote.call(agent_id, request).await
        }
    }
}
