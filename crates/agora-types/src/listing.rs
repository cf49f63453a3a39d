//! Seller-owned product listings

use serde::{Deserialize, Serialize};

use crate::error::ListingError;
use crate::ids::ProductId;

/// Lifecycle of a listing: Draft → Active → Sold | Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Draft,
    Active,
    Sold,
    Cancelled,
}

impl ListingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sold | Self::Cancelled)
    }
}

/// A product a seller offers for sale
///
/// Only the owning seller workflow mutates a listing; buyers work on
/// copies received over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: ProductId,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub currency: String,
    pub condition: String,
    pub category: String,
    pub status: ListingStatus,
    /// Settlement account the buyer pays into
    #[serde(default)]
    pub seller_address: String,
}

impl Listing {
    /// Create a listing in Draft state with a fresh id
    pub fn draft(
        title: impl Into<String>,
        description: impl Into<String>,
        price: f64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            id: ProductId::generate(),
            title: title.into(),
            description: description.into(),
            price,
            currency: currency.into(),
            condition: "new".to_string(),
            category: "general".to_string(),
            status: ListingStatus::Draft,
            seller_address: String::new(),
        }
    }

    pub fn with_id(mut self, id: ProductId) -> Self {
        self.id = id;
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = condition.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Draft → Active. Requires a non-empty settlement address.
    pub fn publish(&mut self, seller_address: &str) -> Result<(), ListingError> {
        self.transition(ListingStatus::Active)?;
        if seller_address.trim().is_empty() {
            return Err(ListingError::MissingSellerAddress {
                listing_id: self.id.to_string(),
            });
        }
        self.seller_address = seller_address.trim().to_string();
        self.status = ListingStatus::Active;
        Ok(())
    }

    /// Active → Sold
    pub fn mark_sold(&mut self) -> Result<(), ListingError> {
        self.transition(ListingStatus::Sold)?;
        self.status = ListingStatus::Sold;
        Ok(())
    }

    /// Draft | Active → Cancelled
    pub fn cancel(&mut self) -> Result<(), ListingError> {
        self.transition(ListingStatus::Cancelled)?;
        self.status = ListingStatus::Cancelled;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.status == ListingStatus::Active
    }

    fn transition(&self, to: ListingStatus) -> Result<(), ListingError> {
        let allowed = matches!(
            (self.status, to),
            (ListingStatus::Draft, ListingStatus::Active)
                | (ListingStatus::Active, ListingStatus::Sold)
                | (ListingStatus::Draft, ListingStatus::Cancelled)
                | (ListingStatus::Active, ListingStatus::Cancelled)
        );
        if allowed {
            Ok(())
        } else {
            Err(ListingError::InvalidTransition {
                listing_id: self.id.to_string(),
                from: self.status,
                to,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lamp() -> Listing {
        Listing::draft("Desk lamp", "Brass desk lamp", 9.0, "HBAR")
    }

    #[test]
    fn test_publish_requires_address() {
        let mut listing = lamp();
        let err = listing.publish("  ").unwrap_err();
        assert!(matches!(err, ListingError::MissingSellerAddress { .. }));
        assert_eq!(listing.status, ListingStatus::Draft);

        listing.publish("0.0.1234").unwrap();
        assert!(listing.is_active());
        assert_eq!(listing.seller_address, "0.0.1234");
    }

    #[test]
    fn test_draft_cannot_be_sold() {
        let mut listing = lamp();
        assert!(matches!(
            listing.mark_sold(),
            Err(ListingError::InvalidTransition { to: ListingStatus::Sold, .. })
        ));
    }

    #[test]
    fn test_terminal_listing_is_frozen() {
        let mut listing = lamp();
        listing.publish("0.0.1234").unwrap();
        listing.mark_sold().unwrap();
        assert!(listing.cancel().is_err());
        assert!(listing.publish("0.0.99").is_err());
        assert_eq!(listing.status, ListingStatus::Sold);
    }
}
