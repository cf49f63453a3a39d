//! Handler registry
//!
//! Maps an agent id to the handler that answers messages addressed to it.
//! Agents without a handler get an echo reply.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use agora_types::{metadata_keys, AgentId, Message};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::HandlerError;

/// Produces a reply for an incoming message.
///
/// Handlers may be slow (they call decision oracles and payment
/// executors); the task server always runs them off the request path.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message, agent_id: &AgentId) -> Result<Message, HandlerError>;
}

/// Adapter turning an async closure into a [`MessageHandler`]
pub struct FnHandler<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

/// Wrap `f` as a handler
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F, Fut>
where
    F: Fn(Message, AgentId) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Message, HandlerError>> + Send,
{
    FnHandler {
        f,
        _fut: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F, Fut>
where
    F: Fn(Message, AgentId) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Message, HandlerError>> + Send,
{
    async fn handle(&self, message: Message, agent_id: &AgentId) -> Result<Message, HandlerError> {
        (self.f)(message, agent_id.clone()).await
    }
}

/// One handler per agent id
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<AgentId, Arc<dyn MessageHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `agent_id`, replacing any previous one
    pub fn register(&self, agent_id: AgentId, handler: Arc<dyn MessageHandler>) {
        let replaced = self.handlers.write().insert(agent_id.clone(), handler);
        if replaced.is_some() {
            info!(agent_id = %agent_id, "Replaced message handler");
        } else {
            info!(agent_id = %agent_id, "Registered message handler");
        }
    }

    pub fn unregister(&self, agent_id: &AgentId) -> bool {
        self.handlers.write().remove(agent_id).is_some()
    }

    pub fn is_registered(&self, agent_id: &AgentId) -> bool {
        self.handlers.read().contains_key(agent_id)
    }

    /// Registered agent ids, sorted
    pub fn agent_ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.handlers.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Run the handler registered for `agent_id`, or echo
    pub async fn dispatch(&self, agent_id: &AgentId, message: Message) -> Result<Message, HandlerError> {
        // The lock is released before awaiting the handler.
        let handler = self.handlers.read().get(agent_id).cloned();
        match handler {
            Some(handler) => handler.handle(message, agent_id).await,
            None => {
                debug!(agent_id = %agent_id, "No handler registered, echoing");
                Ok(echo(&message))
            }
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("agents", &self.agent_ids())
            .finish()
    }
}

fn echo(message: &Message) -> Message {
    Message::agent_text(format!("Echo: {}", message.text_content()))
        .with_metadata(metadata_keys::ECHO, Value::Bool(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upper() -> Arc<dyn MessageHandler> {
        Arc::new(handler_fn(|message: Message, _agent: AgentId| async move {
            Ok(Message::agent_text(message.text_content().to_uppercase()))
        }))
    }

    #[tokio::test]
    async fn test_unregistered_agent_echoes() {
        let registry = HandlerRegistry::new();
        let reply = registry
            .dispatch(&AgentId::from("nobody"), Message::buyer_text("ping"))
            .await
            .unwrap();
        assert_eq!(reply.text_content(), "Echo: ping");
        assert_eq!(reply.metadata.get("echo"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_registered_handler_is_used() {
        let registry = HandlerRegistry::new();
        let agent = AgentId::from("shouter");
        registry.register(agent.clone(), upper());

        let reply = registry.dispatch(&agent, Message::buyer_text("hey")).await.unwrap();
        assert_eq!(reply.text_content(), "HEY");
        assert!(registry.is_registered(&agent));
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let registry = HandlerRegistry::new();
        let agent = AgentId::from("seller");
        registry.register(agent.clone(), upper());
        registry.register(
            agent.clone(),
            Arc::new(handler_fn(|_m: Message, _a: AgentId| async {
                Ok(Message::agent_text("second"))
            })),
        );

        let reply = registry.dispatch(&agent, Message::buyer_text("x")).await.unwrap();
        assert_eq!(reply.text_content(), "second");
        assert_eq!(registry.agent_ids(), vec![agent]);
    }

    #[tokio::test]
    async fn test_unregister_falls_back_to_echo() {
        let registry = HandlerRegistry::new();
        let agent = AgentId::from("seller");
        registry.register(agent.clone(), upper());
        assert!(registry.unregister(&agent));
        assert!(!registry.unregister(&agent));

        let reply = registry.dispatch(&agent, Message::buyer_text("x")).await.unwrap();
        assert_eq!(reply.text_content(), "Echo: x");
    }
}
