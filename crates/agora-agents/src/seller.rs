//! Seller negotiation workflow
//!
//! One workflow per listing:
//!
//! ```text
//! List → Wait ⇄ Evaluate → Accept
//!          ↑_________________|
//!          └── payment ──→ Ship → Done
//! ```
//!
//! Offers queue up in `incoming_offers`. Every evaluation sends the
//! workflow back to Wait: an acceptance or counter only records terms, and
//! the listing stays on offer until a payment covering those terms
//! arrives. A buyer whose payment never happens does not hold the listing.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use agora_types::{Listing, NegotiationOffer, NegotiationResponse, NegotiationStatus, ProductId, SettlementId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::SellerError;
use crate::guard::OracleGuard;
use crate::oracle::{consult, evaluate_threshold, DecisionOracle, DecisionRequest};

pub type Result<T> = std::result::Result<T, SellerError>;

/// Tolerance when comparing paid and agreed amounts
const PRICE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SellerStep {
    List,
    Wait,
    Evaluate,
    Accept,
    Ship,
    Done,
}

impl SellerStep {
    fn name(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Wait => "wait",
            Self::Evaluate => "evaluate",
            Self::Accept => "accept",
            Self::Ship => "ship",
            Self::Done => "done",
        }
    }
}

/// Payment details a buyer sends after settling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentNotice {
    pub product_id: ProductId,
    pub settlement_id: SettlementId,
    pub amount: f64,
    pub currency: String,
    /// Paying account
    pub payer: String,
}

/// Shipment confirmation returned to the buyer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentInfo {
    pub tracking_id: String,
    pub product_id: ProductId,
    pub settlement_id: SettlementId,
    pub message: String,
    pub shipped_at: DateTime<Utc>,
}

/// Final record of a completed sale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRecord {
    pub listing: Listing,
    pub sold_price: f64,
    pub shipment_info: ShipmentInfo,
}

#[derive(Debug, Clone, PartialEq)]
struct ReceivedPayment {
    amount: f64,
    settlement_id: SettlementId,
}

pub struct SellerWorkflow {
    listing: Listing,
    seller_address: String,
    incoming_offers: VecDeque<NegotiationOffer>,
    current_offer: Option<NegotiationOffer>,
    evaluation: Option<NegotiationResponse>,
    outstanding_counter: Option<f64>,
    agreed_price: Option<f64>,
    payment_received: Option<ReceivedPayment>,
    step: SellerStep,
    oracle: Arc<dyn DecisionOracle>,
    guard: OracleGuard,
    oracle_timeout: Duration,
}

impl SellerWorkflow {
    pub fn new(
        listing: Listing,
        seller_address: impl Into<String>,
        oracle: Arc<dyn DecisionOracle>,
        oracle_timeout: Duration,
    ) -> Self {
        Self {
            listing,
            seller_address: seller_address.into(),
            incoming_offers: VecDeque::new(),
            current_offer: None,
            evaluation: None,
            outstanding_counter: None,
            agreed_price: None,
            payment_received: None,
            step: SellerStep::List,
            oracle,
            guard: OracleGuard::new(),
            oracle_timeout,
        }
    }

    pub fn with_guard(mut self, guard: OracleGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn listing(&self) -> &Listing {
        &self.listing
    }

    pub fn step(&self) -> SellerStep {
        self.step
    }

    pub fn current_offer(&self) -> Option<&NegotiationOffer> {
        self.current_offer.as_ref()
    }

    pub fn evaluation(&self) -> Option<&NegotiationResponse> {
        self.evaluation.as_ref()
    }

    pub fn agreed_price(&self) -> Option<f64> {
        self.agreed_price
    }

    pub fn pending_offers(&self) -> usize {
        self.incoming_offers.len()
    }

    pub fn payment_received(&self) -> bool {
        self.payment_received.is_some()
    }

    fn require(&self, step: SellerStep, requirement: &'static str) -> Result<()> {
        if self.step == step {
            Ok(())
        } else {
            Err(SellerError::Precondition {
                step: step.name(),
                requirement,
            })
        }
    }

    // ========================================================================
    // Steps
    // ========================================================================

    /// List: publish the listing under the seller's settlement address
    pub fn list(&mut self) -> Result<&Listing> {
        self.require(SellerStep::List, "an unpublished listing")?;
        self.listing.publish(&self.seller_address)?;
        self.step = SellerStep::Wait;
        info!(product_id = %self.listing.id, price = self.listing.price, "Listing published");
        Ok(&self.listing)
    }

    /// Queue an offer for evaluation
    pub fn submit_offer(&mut self, offer: NegotiationOffer) -> Result<()> {
        if !self.listing.is_active() {
            return Err(SellerError::Precondition {
                step: "wait",
                requirement: "an active listing",
            });
        }
        offer
            .validate()
            .map_err(|e| SellerError::InvalidOffer(e.to_string()))?;
        if let Some(ref product_id) = offer.product_id {
            if product_id != &self.listing.id {
                return Err(SellerError::InvalidOffer(format!(
                    "offer is for {product_id}, not {}",
                    self.listing.id
                )));
            }
        }
        self.incoming_offers.push_back(offer);
        Ok(())
    }

    /// Wait: take the next queued offer, if any
    pub fn wait(&mut self) -> Option<&NegotiationOffer> {
        if self.step != SellerStep::Wait {
            return None;
        }
        let offer = self.incoming_offers.pop_front()?;
        self.current_offer = Some(offer);
        self.evaluation = None;
        self.step = SellerStep::Evaluate;
        self.current_offer.as_ref()
    }

    /// Evaluate the current offer.
    ///
    /// The oracle's answer is used when it is well-formed; otherwise the
    /// threshold policy decides. Anything but Accept returns to Wait.
    pub async fn evaluate(&mut self) -> Result<&NegotiationResponse> {
        self.require(SellerStep::Evaluate, "a current offer")?;
        let offer = self
            .current_offer
            .clone()
            .ok_or(SellerError::Precondition {
                step: "evaluate",
                requirement: "a current offer",
            })?;

        let request = DecisionRequest::EvaluateOffer {
            listing: self.listing.clone(),
            offer: offer.clone(),
        };
        let response = match consult(self.oracle.as_ref(), &request, self.oracle_timeout).await {
            Ok(raw) => match self.guard.parse_negotiation_response(&raw) {
                Ok(response) => response,
                Err(err) => {
                    warn!(product_id = %self.listing.id, error = %err, "Oracle evaluation rejected, using threshold policy");
                    evaluate_threshold(&self.listing, &offer)
                }
            },
            Err(err) => {
                warn!(product_id = %self.listing.id, error = %err, "Oracle unavailable, using threshold policy");
                evaluate_threshold(&self.listing, &offer)
            }
        };

        info!(
            product_id = %self.listing.id,
            offered = offer.offered_price,
            status = ?response.status,
            "Offer evaluated"
        );

        match response.status {
            NegotiationStatus::Accept => self.step = SellerStep::Accept,
            NegotiationStatus::Counter => {
                self.outstanding_counter = response.counter_offer.as_ref().map(|c| c.offered_price);
                self.current_offer = None;
                self.step = SellerStep::Wait;
            }
            NegotiationStatus::Reject => {
                self.current_offer = None;
                self.step = SellerStep::Wait;
            }
        }
        Ok(&*self.evaluation.insert(response))
    }

    /// Accept: agree to the current offer and produce the acceptance.
    ///
    /// The accepted price becomes a payment floor and the workflow returns
    /// to Wait, so later offers are still heard until someone pays.
    pub fn accept(&mut self) -> Result<NegotiationResponse> {
        self.require(SellerStep::Accept, "an acceptable evaluation")?;
        let (offer, response) = match (&self.current_offer, &self.evaluation) {
            (Some(offer), Some(response)) if response.is_accept() => (offer.clone(), response.clone()),
            _ => {
                return Err(SellerError::Precondition {
                    step: "accept",
                    requirement: "an acceptable evaluation",
                })
            }
        };
        let price = offer.offered_price;
        self.agreed_price = Some(self.agreed_price.map_or(price, |p| p.min(price)));
        self.current_offer = None;
        self.step = SellerStep::Wait;
        info!(product_id = %self.listing.id, price, "Offer accepted");
        Ok(response)
    }

    /// Lowest price the seller has agreed to or countered with, else the
    /// listed price
    pub fn payment_floor(&self) -> f64 {
        match (self.agreed_price, self.outstanding_counter) {
            (Some(agreed), Some(counter)) => agreed.min(counter),
            (Some(price), None) | (None, Some(price)) => price,
            (None, None) => self.listing.price,
        }
    }

    /// Record the buyer's payment.
    ///
    /// The amount must cover [`payment_floor`](Self::payment_floor).
    pub fn record_payment(&mut self, amount: f64, settlement_id: SettlementId) -> Result<()> {
        if !self.listing.is_active() || self.payment_received.is_some() {
            return Err(SellerError::Precondition {
                step: "ship",
                requirement: "an active listing",
            });
        }
        let floor = self.payment_floor();
        if amount + PRICE_EPSILON < floor {
            return Err(SellerError::Underpaid {
                received: amount,
                agreed: floor,
            });
        }

        info!(product_id = %self.listing.id, amount, settlement_id = %settlement_id, "Payment received");
        self.agreed_price = Some(amount);
        self.payment_received = Some(ReceivedPayment {
            amount,
            settlement_id,
        });
        self.step = SellerStep::Ship;
        Ok(())
    }

    /// Ship: confirm shipment and mark the listing sold
    pub fn ship(&mut self) -> Result<SaleRecord> {
        let payment = self.payment_received.clone().ok_or(SellerError::Precondition {
            step: "ship",
            requirement: "a received payment",
        })?;
        self.listing.mark_sold()?;
        self.step = SellerStep::Done;

        let shipment_info = ShipmentInfo {
            tracking_id: format!("ship_{}", payment.settlement_id.as_str().trim_start_matches("settle_")),
            product_id: self.listing.id.clone(),
            settlement_id: payment.settlement_id,
            message: format!("{} is on its way.", self.listing.title),
            shipped_at: Utc::now(),
        };
        info!(product_id = %self.listing.id, tracking_id = %shipment_info.tracking_id, "Shipped");

        Ok(SaleRecord {
            listing: self.listing.clone(),
            sold_price: payment.amount,
            shipment_info,
        })
    }
}

impl std::fmt::Debug for SellerWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SellerWorkflow")
            .field("listing", &self.listing.id)
            .field("step", &self.step)
            .field("pending_offers", &self.incoming_offers.len())
            .field("agreed_price", &self.agreed_price)
            .finish()
    }
}
