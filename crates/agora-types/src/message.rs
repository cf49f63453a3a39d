//! Messages exchanged between agents

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{MessageId, TaskId};

/// Free-form structured metadata attached to messages and tasks
pub type Metadata = serde_json::Map<String, Value>;

/// Well-known metadata keys used by the negotiation protocol
pub mod metadata_keys {
    /// What the sender wants the receiving agent to do
    pub const ACTION: &str = "action";
    /// Listings published by a seller
    pub const LISTINGS: &str = "listings";
    /// A buyer's structured offer
    pub const NEGOTIATION_OFFER: &str = "negotiationOffer";
    /// A seller's structured answer to an offer
    pub const NEGOTIATION_RESPONSE: &str = "negotiationResponse";
    /// Settlement details sent after paying
    pub const PAYMENT: &str = "payment";
    /// Shipment confirmation from a seller
    pub const SHIPMENT: &str = "shipment";
    /// Purchase outcome reported by a buyer agent
    pub const PURCHASE: &str = "purchase";
    pub const BUDGET: &str = "budget";
    pub const QUERY: &str = "query";
    pub const CURRENCY: &str = "currency";
    /// Set on default echo replies
    pub const ECHO: &str = "echo";
}

/// Values of the `action` metadata key
pub mod actions {
    pub const LIST_PRODUCTS: &str = "list_products";
    pub const NEGOTIATE: &str = "negotiate";
    pub const PAYMENT_NOTIFICATION: &str = "payment_notification";
    pub const PURCHASE: &str = "purchase";
}

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The party initiating a purchase (a person or a buyer agent)
    Buyer,
    /// An agent answering a request
    Agent,
}

/// Location and type of a non-text payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// One ordered piece of message content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Part {
    Text {
        text: String,
    },
    Image(MediaPayload),
    Audio(MediaPayload),
    Video(MediaPayload),
    #[serde(rename_all = "camelCase")]
    File {
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// The text of a text part
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A message from one agent to another
///
/// Messages are immutable once built: the builder methods consume `self`
/// and there are no setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
    pub message_id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Message {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            role,
            parts,
            message_id: MessageId::generate(),
            task_id: None,
            timestamp: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    /// A single-part text message authored by the buyer side
    pub fn buyer_text(text: impl Into<String>) -> Self {
        Self::new(Role::Buyer, vec![Part::text(text)])
    }

    /// A single-part text message authored by an agent
    pub fn agent_text(text: impl Into<String>) -> Self {
        Self::new(Role::Agent, vec![Part::text(text)])
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Attach the `action` metadata entry
    pub fn with_action(self, action: &str) -> Self {
        self.with_metadata(metadata_keys::ACTION, Value::String(action.to_string()))
    }

    /// Associate the message with a task
    pub fn in_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// All text parts joined with newlines
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The `action` metadata entry, if present
    pub fn action(&self) -> Option<&str> {
        self.metadata.get(metadata_keys::ACTION).and_then(Value::as_str)
    }

    /// Decode a metadata entry into a typed value.
    ///
    /// Returns `None` when the key is missing, `Some(Err)` when it is present
    /// but malformed.
    pub fn metadata_as<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Option<Result<T, serde_json::Error>> {
        self.metadata
            .get(key)
            .map(|value| serde_json::from_value(value.clone()))
    }
}
