//! Agora Agents - Buyer and seller negotiation
//!
//! Two workflows trade through the task protocol:
//!
//! - **BuyerWorkflow**: discover sellers, pick a product, negotiate, pay,
//!   confirm shipment
//! - **SellerWorkflow**: publish a listing, evaluate queued offers, accept,
//!   ship once paid
//!
//! Decisions are delegated to a [`DecisionOracle`] (typically an LLM). Its
//! output always passes through the [`OracleGuard`]; whenever the oracle is
//! unavailable or its answer is rejected, a deterministic policy decides
//! instead. Free-text replies from counterparties are read with the
//! heuristics in [`heuristics`].
//!
//! # Guarantees
//!
//! 1. The buyer never agrees to a price above its budget
//! 2. A purchase terminates: each failed negotiation excludes one product
//! 3. No payment is attempted to a malformed seller address

pub mod buyer;
pub mod error;
pub mod guard;
pub mod handlers;
pub mod heuristics;
pub mod oracle;
pub mod payment;
pub mod seller;

pub use buyer::{
    interpret_seller_reply, BuyerConfig, BuyerDeps, BuyerNegotiationState, BuyerStep, BuyerWorkflow,
    DiscoveredProduct, NegotiationOutcome, PurchaseRequest, PurchaseResult,
};
pub use error::*;
pub use guard::{BuyerAction, GuardConfig, OfferPlan, OracleGuard, ProductChoice};
pub use handlers::{BuyerAgent, SellerAgent};
pub use oracle::{
    consult, deterministic_choice, deterministic_plan, evaluate_threshold, ChatOracle, ChatOracleConfig,
    DecisionOracle, DecisionRequest, DeterministicOracle, ACCEPT_RATIO, COUNTER_RATIO,
};
pub use payment::{AccountAddress, LedgerPaymentExecutor, PaymentExecutor, PaymentRequest, Settlement};
pub use seller::{PaymentNotice, SaleRecord, SellerStep, SellerWorkflow, ShipmentInfo};
