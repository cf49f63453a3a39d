//! Agora Client - Talking to other agents
//!
//! Agents only exchange messages through the task protocol. This crate
//! hides the send-then-poll dance behind [`AgentClient`]:
//!
//! ```ignore
//! let client = AgentClient::new(transport);
//! let task = client.send_and_wait(&seller, message, PollOptions::default()).await?;
//! let reply = task.reply();
//! ```
//!
//! Transports decide where a request goes: straight into an in-process
//! [`agora_tasks::TaskServer`], or over HTTP to a remote agent endpoint.
//! [`AgentDirectory`] answers which agents offer a capability.

pub mod client;
pub mod directory;
pub mod error;
pub mod transport;

pub use client::*;
pub use directory::*;
pub use error::*;
pub use transport::*;
