//! Error types for Agora value objects

use thiserror::Error;

use crate::listing::ListingStatus;

/// Errors raised when a value object is constructed or transitioned illegally
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TypesError {
    #[error("Counter response requires a counter offer")]
    MissingCounterOffer,

    #[error("Only counter responses may carry a counter offer")]
    UnexpectedCounterOffer,

    #[error("Invalid price {price}: must be finite and positive")]
    InvalidPrice { price: f64 },

    #[error("Negotiation round must be positive")]
    InvalidRound,

    #[error("Listing error: {0}")]
    Listing(#[from] ListingError),
}

/// Listing lifecycle violations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ListingError {
    #[error("Cannot publish listing {listing_id} without a seller address")]
    MissingSellerAddress { listing_id: String },

    #[error("Listing {listing_id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        listing_id: String,
        from: ListingStatus,
        to: ListingStatus,
    },
}

pub type Result<T> = std::result::Result<T, TypesError>;
