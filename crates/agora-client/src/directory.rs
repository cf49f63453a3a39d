//! Capability-based agent discovery

use agora_types::AgentId;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::DirectoryError;

/// Well-known capability names
pub mod capabilities {
    pub const SELL: &str = "sell";
    pub const BUY: &str = "buy";
}

/// Where to reach an agent and what it can do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEndpoint {
    pub agent_id: AgentId,
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl AgentEndpoint {
    pub fn new(agent_id: impl Into<AgentId>, endpoint: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            endpoint: endpoint.into(),
            capabilities: Vec::new(),
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.eq_ignore_ascii_case(capability))
    }
}

#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn discover(&self, capability: &str) -> Result<Vec<AgentEndpoint>, DirectoryError>;
}

/// Directory populated at startup
#[derive(Debug, Default)]
pub struct StaticDirectory {
    entries: RwLock<Vec<AgentEndpoint>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, replacing any entry for the same agent
    pub fn register(&self, endpoint: AgentEndpoint) {
        let mut entries = self.entries.write();
        entries.retain(|e| e.agent_id != endpoint.agent_id);
        entries.push(endpoint);
    }

    pub fn unregister(&self, agent_id: &AgentId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| &e.agent_id != agent_id);
        entries.len() != before
    }

    pub fn all(&self) -> Vec<AgentEndpoint> {
        self.entries.read().clone()
    }
}

#[async_trait]
impl AgentDirectory for StaticDirectory {
    async fn discover(&self, capability: &str) -> Result<Vec<AgentEndpoint>, DirectoryError> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| e.has_capability(capability))
            .cloned()
            .collect())
    }
}
