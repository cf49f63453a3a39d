//! Agora Tasks - Asynchronous task protocol
//!
//! Two agents never call each other synchronously. A sender posts a message
//! with `message/send`, gets a `Working` task back immediately, and polls
//! `tasks/get` until the task reaches a terminal state. This crate provides
//! the server side of that protocol:
//!
//! - **TaskStore**: concurrency-safe task records with a monotonic lifecycle
//! - **HandlerRegistry**: one message handler per agent id, echo by default
//! - **TaskServer**: JSON-RPC dispatch plus one detached worker per message
//!
//! # Guarantees
//!
//! 1. `message/send` latency is bounded by task creation, never by the handler
//! 2. A task is created before any `tasks/get` can observe it
//! 3. At most one terminal transition lands per task, even when cancellation
//!    races with completion
//! 4. Handler failures become `Failed` tasks, never RPC errors

pub mod error;
pub mod registry;
pub mod server;
pub mod store;

pub use error::*;
pub use registry::*;
pub use server::*;
pub use store::*;
