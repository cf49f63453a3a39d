//! Structured negotiation payloads carried in message metadata

use serde::{Deserialize, Serialize};

use crate::error::{Result, TypesError};
use crate::ids::ProductId;

/// An offer made by either side for one product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationOffer {
    /// 1-based negotiation round
    pub round: u32,
    pub offered_price: f64,
    pub currency: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<ProductId>,
}

impl NegotiationOffer {
    pub fn new(
        round: u32,
        offered_price: f64,
        currency: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            round,
            offered_price,
            currency: currency.into(),
            message: message.into(),
            product_id: None,
        }
    }

    pub fn for_product(mut self, product_id: ProductId) -> Self {
        self.product_id = Some(product_id);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.round == 0 {
            return Err(TypesError::InvalidRound);
        }
        if !self.offered_price.is_finite() || self.offered_price <= 0.0 {
            return Err(TypesError::InvalidPrice {
                price: self.offered_price,
            });
        }
        Ok(())
    }
}

/// Outcome of evaluating an offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationStatus {
    Accept,
    Counter,
    Reject,
}

/// Answer to a [`NegotiationOffer`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationResponse {
    pub status: NegotiationStatus,
    /// Present iff `status` is `Counter`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_offer: Option<NegotiationOffer>,
    pub message: String,
}

impl NegotiationResponse {
    pub fn accept(message: impl Into<String>) -> Self {
        Self {
            status: NegotiationStatus::Accept,
            counter_offer: None,
            message: message.into(),
        }
    }

    pub fn counter(offer: NegotiationOffer, message: impl Into<String>) -> Self {
        Self {
            status: NegotiationStatus::Counter,
            counter_offer: Some(offer),
            message: message.into(),
        }
    }

    pub fn reject(message: impl Into<String>) -> Self {
        Self {
            status: NegotiationStatus::Reject,
            counter_offer: None,
            message: message.into(),
        }
    }

    /// Check the counter-offer presence rule and the counter price
    pub fn validate(&self) -> Result<()> {
        match (self.status, &self.counter_offer) {
            (NegotiationStatus::Counter, None) => Err(TypesError::MissingCounterOffer),
            (NegotiationStatus::Counter, Some(offer)) => offer.validate(),
            (_, Some(_)) => Err(TypesError::UnexpectedCounterOffer),
            (_, None) => Ok(()),
        }
    }

    pub fn is_accept(&self) -> bool {
        self.status == NegotiationStatus::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_counter_requires_offer() {
        let raw = json!({"status": "counter", "message": "meet me halfway"});
        let response: NegotiationResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(response.validate(), Err(TypesError::MissingCounterOffer));
    }

    #[test]
    fn test_accept_must_not_carry_offer() {
        let mut response = NegotiationResponse::accept("deal");
        response.counter_offer = Some(NegotiationOffer::new(2, 10.0, "HBAR", "x"));
        assert_eq!(response.validate(), Err(TypesError::UnexpectedCounterOffer));
    }

    #[test]
    fn test_counter_offer_wire_names() {
        let response = NegotiationResponse::counter(
            NegotiationOffer::new(2, 92.5, "HBAR", "how about this")
                .for_product(ProductId::from("prod_1")),
            "counter",
        );
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "counter");
        assert_eq!(value["counterOffer"]["offeredPrice"], 92.5);
        assert_eq!(value["counterOffer"]["productId"], "prod_1");
        assert!(response.validate().is_ok());
    }

    #[test]
    fn test_offer_rejects_non_positive_price() {
        let offer = NegotiationOffer::new(1, 0.0, "HBAR", "free please");
        assert!(matches!(offer.validate(), Err(TypesError::InvalidPrice { .. })));
        let offer = NegotiationOffer::new(0, 5.0, "HBAR", "round zero");
        assert_eq!(offer.validate(), Err(TypesError::InvalidRound));
    }
}
