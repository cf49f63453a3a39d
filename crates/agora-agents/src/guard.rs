//! Oracle Guard - validates decision oracle output
//!
//! Oracle output is treated as untrusted. Every decision is parsed into a
//! typed value and checked against the negotiation's constraints before a
//! workflow acts on it:
//! - product choices must name one of the offered candidates
//! - prices must be finite, positive and within budget
//! - counter-offers must be present exactly when the status is `counter`
//!
//! Rejected output never reaches a workflow; the caller applies its
//! deterministic fallback instead.

use agora_types::{Listing, NegotiationResponse, ProductId};
use serde::{Deserialize, Serialize};

use crate::error::GuardError;

pub type Result<T> = std::result::Result<T, GuardError>;

/// Buyer's pick among the candidates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductChoice {
    pub product_id: ProductId,
    #[serde(default)]
    pub reason: String,
}

/// What the buyer does about a product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuyerAction {
    /// Offer the listed price
    Accept,
    /// Offer a lower price
    Counter,
    /// Walk away
    Reject,
}

/// Buyer's plan for one negotiation round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferPlan {
    pub action: BuyerAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default)]
    pub message: String,
}

/// Guard configuration
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Largest raw output accepted
    pub max_output_bytes: usize,
    /// Lowercase substrings that mark manipulated output
    pub injection_patterns: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_output_bytes: 16 * 1024,
            injection_patterns: vec![
                "ignore previous".to_string(),
                "ignore all previous".to_string(),
                "disregard the rules".to_string(),
                "system prompt".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OracleGuard {
    config: GuardConfig,
}

impl OracleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: GuardConfig) -> Self {
        Self { config }
    }

    /// Size and injection checks, then strip markdown fences around the
    /// JSON object
    fn screen<'a>(&self, raw: &'a str) -> Result<&'a str> {
        if raw.len() > self.config.max_output_bytes {
            return Err(GuardError::TooLarge {
                len: raw.len(),
                max: self.config.max_output_bytes,
            });
        }

        let lower = raw.to_lowercase();
        if let Some(pattern) = self
            .config
            .injection_patterns
            .iter()
            .find(|p| lower.contains(p.as_str()))
        {
            return Err(GuardError::InjectionDetected {
                pattern: pattern.clone(),
            });
        }

        match (raw.find('{'), raw.rfind('}')) {
            (Some(start), Some(end)) if start < end => Ok(&raw[start..=end]),
            _ => Err(GuardError::InvalidJson {
                message: "no JSON object in output".to_string(),
            }),
        }
    }

    fn decode<T: for<'de> Deserialize<'de>>(&self, raw: &str) -> Result<T> {
        let json = self.screen(raw)?;
        serde_json::from_str(json).map_err(|e| GuardError::InvalidJson {
            message: e.to_string(),
        })
    }

    /// Parse a product choice and resolve it against `candidates`
    pub fn parse_product_choice<'a>(&self, raw: &str, candidates: &'a [Listing]) -> Result<&'a Listing> {
        let choice: ProductChoice = self.decode(raw)?;
        candidates
            .iter()
            .find(|l| l.id == choice.product_id)
            .ok_or(GuardError::UnknownProduct {
                product_id: choice.product_id,
            })
    }

    /// Parse an offer plan and check it against `budget`.
    ///
    /// An `accept` without a price means the listed price.
    pub fn parse_offer_plan(&self, raw: &str, product: &Listing, budget: f64) -> Result<OfferPlan> {
        let mut plan: OfferPlan = self.decode(raw)?;

        match plan.action {
            BuyerAction::Reject => {
                plan.price = None;
                return Ok(plan);
            }
            BuyerAction::Accept if plan.price.is_none() => plan.price = Some(product.price),
            BuyerAction::Counter if plan.price.is_none() => {
                return Err(GuardError::MissingField {
                    field: "price".to_string(),
                })
            }
            _ => {}
        }

        let price = plan.price.unwrap_or(product.price);
        check_price(price)?;
        if price > budget {
            return Err(GuardError::OverBudget { price, budget });
        }
        Ok(plan)
    }

    /// Parse a seller's answer to an offer
    pub fn parse_negotiation_response(&self, raw: &str) -> Result<NegotiationResponse> {
        let response: NegotiationResponse = self.decode(raw)?;
        response
            .validate()
            .map_err(|e| GuardError::Invalid(e.to_string()))?;
        Ok(response)
    }
}

fn check_price(price: f64) -> Result<()> {
    if price.is_finite() && price > 0.0 {
        Ok(())
    } else {
        Err(GuardError::InvalidPrice { price })
    }
}
