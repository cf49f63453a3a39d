//! Decision Oracle - who picks the product and the price
//!
//! An oracle answers a [`DecisionRequest`] with raw structured output
//! (JSON text). Output is untrusted: callers run it through
//! [`crate::guard::OracleGuard`] and fall back to deterministic logic when
//! it fails validation, errors, or times out.

use std::time::Duration;

use agora_types::{Listing, NegotiationOffer, NegotiationResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::OracleError;
use crate::guard::{BuyerAction, OfferPlan, ProductChoice};

/// Offers at or above this share of the listed price are accepted
pub const ACCEPT_RATIO: f64 = 0.95;
/// Offers below this share of the listed price are rejected; in between
/// the seller counters at the midpoint
pub const COUNTER_RATIO: f64 = 0.80;

/// What the oracle is asked to decide
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionRequest {
    /// Buyer: pick one of the remaining candidates
    SelectProduct {
        query: String,
        budget: f64,
        candidates: Vec<Listing>,
    },
    /// Buyer: accept, counter or walk away from a product
    PlanOffer {
        product: Listing,
        budget: f64,
        round: u32,
    },
    /// Seller: answer a buyer's offer
    EvaluateOffer {
        listing: Listing,
        offer: NegotiationOffer,
    },
}

impl DecisionRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SelectProduct { .. } => "select_product",
            Self::PlanOffer { .. } => "plan_offer",
            Self::EvaluateOffer { .. } => "evaluate_offer",
        }
    }
}

#[async_trait]
pub trait DecisionOracle: Send + Sync {
    fn name(&self) -> &'static str;

    /// Raw structured output for `request`
    async fn decide(&self, request: &DecisionRequest) -> Result<String, OracleError>;
}

/// Ask `oracle`, giving up after `limit`
pub async fn consult(
    oracle: &dyn DecisionOracle,
    request: &DecisionRequest,
    limit: Duration,
) -> Result<String, OracleError> {
    match tokio::time::timeout(limit, oracle.decide(request)).await {
        Ok(result) => result,
        Err(_) => Err(OracleError::Timeout {
            ms: limit.as_millis() as u64,
        }),
    }
}

// ============================================================================
// Deterministic policies
// ============================================================================

/// The seller's published negotiation policy.
///
/// Offer ≥ 95% of the listed price: accept. 80% up to 95%: counter at
/// the midpoint of listed and offered price. Below 80%: reject.
pub fn evaluate_threshold(listing: &Listing, offer: &NegotiationOffer) -> NegotiationResponse {
    let listed = listing.price;
    let offered = offer.offered_price;

    if offered >= listed * ACCEPT_RATIO {
        NegotiationResponse::accept(format!(
            "Deal. {} is yours for {} {}.",
            listing.title, offered, listing.currency
        ))
    } else if offered >= listed * COUNTER_RATIO {
        let counter = (listed + offered) / 2.0;
        let message = format!("I can meet you at {} {}.", counter, listing.currency);
        NegotiationResponse::counter(
            NegotiationOffer::new(offer.round + 1, counter, listing.currency.clone(), message.clone())
                .for_product(listing.id.clone()),
            message,
        )
    } else {
        NegotiationResponse::reject(format!(
            "Sorry, {} {} is too low for {}.",
            offered, listing.currency, listing.title
        ))
    }
}

/// The buyer's fallback plan: pay the listed price when affordable,
/// counter at the budget when it is within 80% of the price, otherwise
/// walk away.
pub fn deterministic_plan(product: &Listing, budget: f64) -> OfferPlan {
    if product.price <= budget {
        OfferPlan {
            action: BuyerAction::Accept,
            price: Some(product.price),
            message: format!("I'll take {} at {} {}.", product.title, product.price, product.currency),
        }
    } else if budget >= product.price * COUNTER_RATIO {
        OfferPlan {
            action: BuyerAction::Counter,
            price: Some(budget),
            message: format!("Would you take {} {} for {}?", budget, product.currency, product.title),
        }
    } else {
        OfferPlan {
            action: BuyerAction::Reject,
            price: None,
            message: format!("{} is beyond my budget of {}.", product.title, budget),
        }
    }
}

/// Cheapest affordable candidate, else the cheapest overall
pub fn deterministic_choice(candidates: &[Listing], budget: f64) -> Option<&Listing> {
    let by_price = |a: &&Listing, b: &&Listing| a.price.total_cmp(&b.price);
    candidates
        .iter()
        .filter(|l| l.price <= budget)
        .min_by(by_price)
        .or_else(|| candidates.iter().min_by(by_price))
}

/// Oracle answering every request with the deterministic policies
#[derive(Debug, Clone, Default)]
pub struct DeterministicOracle;

impl DeterministicOracle {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DecisionOracle for DeterministicOracle {
    fn name(&self) -> &'static str {
        "deterministic"
    }

    async fn decide(&self, request: &DecisionRequest) -> Result<String, OracleError> {
        let output = match request {
            DecisionRequest::SelectProduct {
                budget, candidates, ..
            } => {
                let choice = deterministic_choice(candidates, *budget)
                    .ok_or_else(|| OracleError::NoDecision("no candidates".to_string()))?;
                serde_json::to_string(&ProductChoice {
                    product_id: choice.id.clone(),
                    reason: "cheapest candidate within budget".to_string(),
                })
            }
            DecisionRequest::PlanOffer { product, budget, .. } => {
                serde_json::to_string(&deterministic_plan(product, *budget))
            }
            DecisionRequest::EvaluateOffer { listing, offer } => {
                serde_json::to_string(&evaluate_threshold(listing, offer))
            }
        };
        output.map_err(|e| OracleError::InvalidResponse(e.to_string()))
    }
}

// ============================================================================
// Chat-completion backed oracle
// ============================================================================

/// Settings for an OpenAI-compatible `/chat/completions` endpoint
#[derive(Debug, Clone)]
pub struct ChatOracleConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ChatOracleConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            api_key: None,
            model: "llama3".to_string(),
            timeout: Duration::from_secs(30),
            temperature: 0.2,
            max_tokens: 256,
        }
    }
}

/// Oracle backed by a chat model in JSON mode
#[derive(Debug, Clone)]
pub struct ChatOracle {
    config: ChatOracleConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

const SELECT_PROMPT: &str = r#"You are a buyer agent choosing a product. Output valid JSON only.

Schema:
{"productId": "<id of one candidate>", "reason": "short reason"}

Rules:
- productId must be one of the candidate ids
- prefer candidates within budget that match the query"#;

const PLAN_PROMPT: &str = r#"You are a buyer agent negotiating a price. Output valid JSON only.

Schema:
{"action": "accept" | "counter" | "reject", "price": 9.5, "message": "what to tell the seller"}

Rules:
- price must never exceed the budget
- price is required for accept and counter
- reject if the product cannot be bought within budget"#;

const EVALUATE_PROMPT: &str = r#"You are a seller agent answering an offer. Output valid JSON only.

Schema:
{"status": "accept" | "counter" | "reject", "counterOffer": {"round": 2, "offeredPrice": 92.5, "currency": "HBAR", "message": "..."}, "message": "reply to the buyer"}

Rules:
- offer >= 95% of the listed price: accept
- offer between 80% and 95%: counter at the midpoint of listed and offered price
- offer below 80%: reject
- counterOffer only when status is counter"#;

impl ChatOracle {
    pub fn new(config: ChatOracleConfig) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| OracleError::Request(e.to_string()))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ChatOracleConfig {
        &self.config
    }

    fn system_prompt(request: &DecisionRequest) -> &'static str {
        match request {
            DecisionRequest::SelectProduct { .. } => SELECT_PROMPT,
            DecisionRequest::PlanOffer { .. } => PLAN_PROMPT,
            DecisionRequest::EvaluateOffer { .. } => EVALUATE_PROMPT,
        }
    }
}

#[async_trait]
impl DecisionOracle for ChatOracle {
    fn name(&self) -> &'static str {
        "chat"
    }

    async fn decide(&self, request: &DecisionRequest) -> Result<String, OracleError> {
        let context = serde_json::to_string_pretty(request)
            .map_err(|e| OracleError::Request(e.to_string()))?;
        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": Self::system_prompt(request)},
                {"role": "user", "content": context},
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "stream": false,
            "response_format": {"type": "json_object"},
        });

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let mut req = self.client.post(&url).json(&body);
        if let Some(ref key) = self.config.api_key {
            req = req.bearer_auth(key);
        }

        debug!(kind = request.kind(), model = %self.config.model, "Consulting chat oracle");
        let response = req
            .send()
            .await
            .map_err(|e| OracleError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Http { status, body });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;

        chat.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| OracleError::InvalidResponse("empty completion".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_types::NegotiationStatus;
    use proptest::prelude::*;

    fn listing(price: f64) -> Listing {
        Listing::draft("Camera", "Film camera", price, "HBAR")
    }

    fn offer(price: f64) -> NegotiationOffer {
        NegotiationOffer::new(1, price, "HBAR", "offer")
    }

    #[test]
    fn test_threshold_policy_at_price_100() {
        let item = listing(100.0);

        assert_eq!(evaluate_threshold(&item, &offer(96.0)).status, NegotiationStatus::Accept);

        let counter = evaluate_threshold(&item, &offer(85.0));
        assert_eq!(counter.status, NegotiationStatus::Counter);
        let counter_offer = counter.counter_offer.unwrap();
        assert_eq!(counter_offer.offered_price, 92.5);
        assert_eq!(counter_offer.round, 2);

        assert_eq!(evaluate_threshold(&item, &offer(70.0)).status, NegotiationStatus::Reject);
    }

    #[test]
    fn test_threshold_boundaries() {
        let item = listing(100.0);
        assert_eq!(evaluate_threshold(&item, &offer(95.0)).status, NegotiationStatus::Accept);
        assert_eq!(evaluate_threshold(&item, &offer(80.0)).status, NegotiationStatus::Counter);
        assert_eq!(evaluate_threshold(&item, &offer(79.99)).status, NegotiationStatus::Reject);
    }

    #[test]
    fn test_deterministic_plan() {
        let item = listing(9.0);
        assert_eq!(deterministic_plan(&item, 10.0).action, BuyerAction::Accept);
        assert_eq!(deterministic_plan(&item, 10.0).price, Some(9.0));

        let item = listing(11.0);
        let plan = deterministic_plan(&item, 10.0);
        assert_eq!(plan.action, BuyerAction::Counter);
        assert_eq!(plan.price, Some(10.0));

        assert_eq!(deterministic_plan(&listing(50.0), 10.0).action, BuyerAction::Reject);
    }

    #[test]
    fn test_deterministic_choice_prefers_affordable() {
        let items = vec![listing(30.0), listing(8.0), listing(9.0)];
        assert_eq!(deterministic_choice(&items, 10.0).unwrap().price, 8.0);
        assert_eq!(deterministic_choice(&items, 1.0).unwrap().price, 8.0);
        assert!(deterministic_choice(&[], 1.0).is_none());
    }

    #[tokio::test]
    async fn test_consult_times_out() {
        struct Stuck;

        #[async_trait]
        impl DecisionOracle for Stuck {
            fn name(&self) -> &'static str {
                "stuck"
            }

            async fn decide(&self, _request: &DecisionRequest) -> Result<String, OracleError> {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(String::new())
            }
        }

        let request = DecisionRequest::PlanOffer {
            product: listing(1.0),
            budget: 1.0,
            round: 1,
        };
        let err = consult(&Stuck, &request, Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err, OracleError::Timeout { ms: 20 });
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_threshold_bands(price in 1.0f64..10_000.0, ratio in 0.01f64..1.5) {
            let item = listing(price);
            let offered = price * ratio;
            let response = evaluate_threshold(&item, &offer(offered));
            prop_assert!(response.validate().is_ok());

            match response.status {
                NegotiationStatus::Accept => prop_assert!(offered >= price * ACCEPT_RATIO),
                NegotiationStatus::Reject => prop_assert!(offered < price * COUNTER_RATIO),
                NegotiationStatus::Counter => {
                    prop_assert!(offered >= price * COUNTER_RATIO && offered < price * ACCEPT_RATIO);
                    let counter = response.counter_offer.unwrap().offered_price;
                    prop_assert_eq!(counter, (price + offered) / 2.0);
                    prop_assert!(counter > offered && counter < price);
                }
            }
        }
    }
}
