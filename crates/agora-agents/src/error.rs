//! Error types for the negotiation agents

use agora_client::{ClientError, DirectoryError};
use agora_types::{ListingError, ProductId};
use thiserror::Error;

/// Decision oracle failures. Every one of them triggers the caller's
/// deterministic fallback.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    #[error("Oracle request failed: {0}")]
    Request(String),

    #[error("Oracle returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Oracle response unusable: {0}")]
    InvalidResponse(String),

    #[error("Oracle did not answer within {ms}ms")]
    Timeout { ms: u64 },

    #[error("Oracle has no decision: {0}")]
    NoDecision(String),
}

/// Rejections of oracle output
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GuardError {
    #[error("Invalid JSON structure: {message}")]
    InvalidJson { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid price {price}")]
    InvalidPrice { price: f64 },

    #[error("Price {price} exceeds budget {budget}")]
    OverBudget { price: f64, budget: f64 },

    #[error("Product {product_id} is not among the candidates")]
    UnknownProduct { product_id: ProductId },

    #[error("Potential injection detected: {pattern}")]
    InjectionDetected { pattern: String },

    #[error("Output of {len} bytes exceeds limit {max}")]
    TooLarge { len: usize, max: usize },

    #[error("Policy violation: {0}")]
    Invalid(String),
}

/// Payment executor failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PaymentError {
    #[error("Invalid account address '{0}'")]
    InvalidAddress(String),

    #[error("Invalid amount {amount}")]
    InvalidAmount { amount: f64 },

    #[error("Insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: f64, available: f64 },

    #[error("Currency mismatch: account holds {expected}, payment in {actual}")]
    CurrencyMismatch { expected: String, actual: String },

    #[error("Settlement rejected: {0}")]
    Rejected(String),
}

/// Buyer workflow failures, reported in `PurchaseResult::error`
#[derive(Error, Debug)]
pub enum BuyerError {
    #[error("No suitable product found")]
    NoSuitableProduct,

    #[error("Invalid budget {0}")]
    InvalidBudget(f64),

    #[error("Step {step} requires {requirement}")]
    Precondition {
        step: &'static str,
        requirement: &'static str,
    },

    #[error("Seller address '{0}' is not a valid account")]
    InvalidAddress(String),

    #[error("Payment failed: {0}")]
    Payment(#[from] PaymentError),

    #[error("Discovery failed: {0}")]
    Discovery(#[from] DirectoryError),

    #[error("Could not reach seller: {0}")]
    Client(#[from] ClientError),
}

/// Seller workflow failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SellerError {
    #[error("Listing error: {0}")]
    Listing(#[from] ListingError),

    #[error("Step {step} requires {requirement}")]
    Precondition {
        step: &'static str,
        requirement: &'static str,
    },

    #[error("Offer rejected as malformed: {0}")]
    InvalidOffer(String),

    #[error("Payment of {received} does not cover the agreed price {agreed}")]
    Underpaid { received: f64, agreed: f64 },
}
