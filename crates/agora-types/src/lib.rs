//! Agora Types - Value objects for agent-to-agent commerce
//!
//! This crate holds the types shared by every other Agora crate:
//! - Message / Part: what one agent says to another
//! - Task / TaskStatus: the unit of asynchronous work tracked by a task server
//! - JSON-RPC envelopes and error codes for the wire protocol
//! - NegotiationOffer / NegotiationResponse: structured negotiation metadata
//! - Listing: a seller-owned product record with an explicit lifecycle
//!
//! # Invariants
//!
//! 1. Messages are immutable once constructed
//! 2. Terminal task states never transition again
//! 3. A counter-offer is present iff the response status is `Counter`
//! 4. A listing can only be published with a settlement address

pub mod error;
pub mod ids;
pub mod listing;
pub mod message;
pub mod negotiation;
pub mod rpc;
pub mod task;

pub use error::*;
pub use ids::*;
pub use listing::*;
pub use message::*;
pub use negotiation::*;
pub use rpc::*;
pub use task::*;
