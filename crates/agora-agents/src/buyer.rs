//! Buyer purchase workflow
//!
//! ```text
//! Discover → Select → Negotiate → Pay → Complete
//!              ↑__________|
//!            (product excluded)
//! ```
//!
//! Every product that fails negotiation is excluded before the next
//! selection, and selection attempts never exceed the number of discovered
//! products, so a purchase always terminates.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use agora_client::{capabilities, AgentClient, AgentDirectory, PollOptions};
use agora_types::{
    actions, metadata_keys, AgentId, Listing, Message, NegotiationOffer, NegotiationResponse,
    NegotiationStatus, ProductId, SettlementId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{BuyerError, PaymentError};
use crate::guard::{BuyerAction, OracleGuard};
use crate::heuristics::{interpret_reply, ReplySignal};
use crate::oracle::{consult, deterministic_plan, DecisionOracle, DecisionRequest};
use crate::payment::{AccountAddress, PaymentExecutor, PaymentRequest};
use crate::seller::{PaymentNotice, ShipmentInfo};

// ============================================================================
// Requests and results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub query: String,
    pub budget: f64,
    /// Only consider listings in this currency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl PurchaseRequest {
    pub fn new(query: impl Into<String>, budget: f64) -> Self {
        Self {
            query: query.into(),
            budget,
            currency: None,
        }
    }

    pub fn in_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<Listing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<SettlementId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipment: Option<ShipmentInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PurchaseResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            product: None,
            payment_id: None,
            shipment: None,
            error: Some(error.into()),
        }
    }
}

/// A listing together with the seller that offered it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredProduct {
    pub seller: AgentId,
    pub listing: Listing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuyerStep {
    Discover,
    Select,
    Negotiate,
    Pay,
    Complete,
    Failed,
}

/// Everything one purchase run has learned so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyerNegotiationState {
    pub discovered_products: Vec<DiscoveredProduct>,
    pub selected_product: Option<DiscoveredProduct>,
    pub excluded_product_ids: BTreeSet<ProductId>,
    pub offer_accepted: bool,
    pub payment_id: Option<SettlementId>,
    pub current_step: BuyerStep,
    pub error: Option<String>,
    pub selection_attempts: usize,
}

impl Default for BuyerNegotiationState {
    fn default() -> Self {
        Self {
            discovered_products: Vec::new(),
            selected_product: None,
            excluded_product_ids: BTreeSet::new(),
            offer_accepted: false,
            payment_id: None,
            current_step: BuyerStep::Discover,
            error: None,
            selection_attempts: 0,
        }
    }
}

impl BuyerNegotiationState {
    fn candidates(&self) -> Vec<Listing> {
        self.discovered_products
            .iter()
            .filter(|p| !self.excluded_product_ids.contains(&p.listing.id))
            .map(|p| p.listing.clone())
            .collect()
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Collaborators of a buyer
#[derive(Clone)]
pub struct BuyerDeps {
    pub client: Arc<AgentClient>,
    pub directory: Arc<dyn AgentDirectory>,
    pub oracle: Arc<dyn DecisionOracle>,
    pub payments: Arc<dyn PaymentExecutor>,
    pub guard: OracleGuard,
}

#[derive(Debug, Clone)]
pub struct BuyerConfig {
    /// Account the buyer pays from
    pub account: AccountAddress,
    /// Polling applied to every seller task
    pub poll: PollOptions,
    pub oracle_timeout: Duration,
    pub payment_timeout: Duration,
}

impl BuyerConfig {
    pub fn new(account: AccountAddress) -> Self {
        Self {
            account,
            poll: PollOptions::default(),
            oracle_timeout: Duration::from_secs(30),
            payment_timeout: Duration::from_secs(30),
        }
    }
}

/// How negotiating one product ended
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationOutcome {
    /// Agreed at this price
    Agreed(f64),
    /// Product goes on the exclusion list
    Excluded(String),
}

// ============================================================================
// Workflow
// ============================================================================

pub struct BuyerWorkflow {
    deps: BuyerDeps,
    config: BuyerConfig,
    state: BuyerNegotiationState,
}

impl BuyerWorkflow {
    pub fn new(deps: BuyerDeps, config: BuyerConfig) -> Self {
        Self {
            deps,
            config,
            state: BuyerNegotiationState::default(),
        }
    }

    pub fn state(&self) -> &BuyerNegotiationState {
        &self.state
    }

    /// Run a purchase from discovery to shipment confirmation
    pub async fn execute_purchase(&mut self, request: PurchaseRequest) -> PurchaseResult {
        self.state = BuyerNegotiationState::default();
        info!(query = %request.query, budget = request.budget, "Purchase started");

        if !request.budget.is_finite() || request.budget <= 0.0 {
            return self.fail(BuyerError::InvalidBudget(request.budget));
        }

        self.discover(&request).await;

        loop {
            let Some(product) = self.select(&request).await else {
                return self.fail(BuyerError::NoSuitableProduct);
            };

            match self.negotiate(&request, &product).await {
                NegotiationOutcome::Agreed(price) => {
                    let mut agreed = product;
                    agreed.listing.price = price;
                    info!(product_id = %agreed.listing.id, price, "Offer accepted");
                    self.state.offer_accepted = true;
                    self.state.selected_product = Some(agreed);
                    break;
                }
                NegotiationOutcome::Excluded(reason) => {
                    info!(product_id = %product.listing.id, reason = %reason, "Product excluded");
                    self.state.excluded_product_ids.insert(product.listing.id);
                    self.state.selected_product = None;
                }
            }
        }

        if let Err(err) = self.pay().await {
            return self.fail(err);
        }
        self.complete().await
    }

    // ========================================================================
    // Discover
    // ========================================================================

    async fn discover(&mut self, request: &PurchaseRequest) {
        self.state.current_step = BuyerStep::Discover;

        let sellers = match self.deps.directory.discover(capabilities::SELL).await {
            Ok(sellers) => sellers,
            Err(err) => {
                warn!(error = %err, "Seller discovery failed");
                Vec::new()
            }
        };

        for seller in sellers {
            let message = Message::buyer_text(format!("What do you have for '{}'?", request.query))
                .with_action(actions::LIST_PRODUCTS)
                .with_metadata(metadata_keys::QUERY, request.query.clone().into());

            let task = match self
                .deps
                .client
                .send_and_wait(&seller.agent_id, message, self.config.poll)
                .await
            {
                Ok(task) => task,
                Err(err) => {
                    warn!(seller = %seller.agent_id, error = %err, "Could not list seller products");
                    continue;
                }
            };

            let listings = match task.reply().map(|r| r.metadata_as::<Vec<Listing>>(metadata_keys::LISTINGS)) {
                Some(Some(Ok(listings))) => listings,
                Some(Some(Err(err))) => {
                    warn!(seller = %seller.agent_id, error = %err, "Malformed listings");
                    continue;
                }
                Some(None) => {
                    warn!(seller = %seller.agent_id, "Reply carried no listings");
                    continue;
                }
                None => {
                    warn!(seller = %seller.agent_id, state = %task.state(), "Listing task did not complete");
                    continue;
                }
            };

            for listing in listings {
                let wanted_currency = request
                    .currency
                    .as_deref()
                    .map_or(true, |c| c.eq_ignore_ascii_case(&listing.currency));
                let known = self
                    .state
                    .discovered_products
                    .iter()
                    .any(|p| p.listing.id == listing.id);
                if listing.is_active() && wanted_currency && !known {
                    self.state.discovered_products.push(DiscoveredProduct {
                        seller: seller.agent_id.clone(),
                        listing,
                    });
                }
            }
        }

        info!(count = self.state.discovered_products.len(), "Discovery finished");
    }

    // ========================================================================
    // Select
    // ========================================================================

    async fn select(&mut self, request: &PurchaseRequest) -> Option<DiscoveredProduct> {
        self.state.current_step = BuyerStep::Select;
        self.state.offer_accepted = false;

        if self.state.selection_attempts >= self.state.discovered_products.len() {
            return None;
        }
        let candidates = self.state.candidates();
        let first = candidates.first()?.id.clone();
        self.state.selection_attempts += 1;

        let decision = DecisionRequest::SelectProduct {
            query: request.query.clone(),
            budget: request.budget,
            candidates: candidates.clone(),
        };
        let chosen = match consult(self.deps.oracle.as_ref(), &decision, self.config.oracle_timeout).await {
            Ok(raw) => match self.deps.guard.parse_product_choice(&raw, &candidates) {
                Ok(listing) => listing.id.clone(),
                Err(err) => {
                    warn!(error = %err, "Oracle choice rejected, taking first candidate");
                    first
                }
            },
            Err(err) => {
                warn!(error = %err, "Oracle unavailable, taking first candidate");
                first
            }
        };

        let product = self
            .state
            .discovered_products
            .iter()
            .find(|p| p.listing.id == chosen)
            .cloned()?;
        debug!(product_id = %product.listing.id, seller = %product.seller, "Product selected");
        self.state.selected_product = Some(product.clone());
        Some(product)
    }

    // ========================================================================
    // Negotiate
    // ========================================================================

    async fn negotiate(&mut self, request: &PurchaseRequest, product: &DiscoveredProduct) -> NegotiationOutcome {
        self.state.current_step = BuyerStep::Negotiate;
        let listing = &product.listing;
        let round = 1;

        let decision = DecisionRequest::PlanOffer {
            product: listing.clone(),
            budget: request.budget,
            round,
        };
        let plan = match consult(self.deps.oracle.as_ref(), &decision, self.config.oracle_timeout).await {
            Ok(raw) => match self.deps.guard.parse_offer_plan(&raw, listing, request.budget) {
                Ok(plan) => plan,
                Err(err) => {
                    warn!(product_id = %listing.id, error = %err, "Oracle plan rejected, using fallback");
                    deterministic_plan(listing, request.budget)
                }
            },
            Err(err) => {
                warn!(product_id = %listing.id, error = %err, "Oracle unavailable, using fallback");
                deterministic_plan(listing, request.budget)
            }
        };

        if plan.action == BuyerAction::Reject {
            return NegotiationOutcome::Excluded(plan.message);
        }
        let price = plan.price.unwrap_or(listing.price);
        if price > request.budget {
            return NegotiationOutcome::Excluded(format!("offer {price} exceeds budget {}", request.budget));
        }

        let offer = NegotiationOffer::new(round, price, listing.currency.clone(), plan.message.clone())
            .for_product(listing.id.clone());
        let offer_value = match serde_json::to_value(&offer) {
            Ok(value) => value,
            Err(err) => return NegotiationOutcome::Excluded(err.to_string()),
        };
        let message = Message::buyer_text(plan.message)
            .with_action(actions::NEGOTIATE)
            .with_metadata(metadata_keys::NEGOTIATION_OFFER, offer_value);

        let task = match self
            .deps
            .client
            .send_and_wait(&product.seller, message, self.config.poll)
            .await
        {
            Ok(task) => task,
            Err(err) => return NegotiationOutcome::Excluded(err.to_string()),
        };
        match task.reply() {
            Some(reply) => interpret_seller_reply(reply, price, request.budget, &listing.currency),
            None => NegotiationOutcome::Excluded(format!(
                "seller task ended {}: {}",
                task.state(),
                task.status.error.as_deref().unwrap_or("no reply")
            )),
        }
    }

    // ========================================================================
    // Pay / Complete
    // ========================================================================

    async fn pay(&mut self) -> Result<SettlementId, BuyerError> {
        self.state.current_step = BuyerStep::Pay;
        let product = self.state.selected_product.as_ref().ok_or(BuyerError::Precondition {
            step: "pay",
            requirement: "a selected product",
        })?;
        if !self.state.offer_accepted {
            return Err(BuyerError::Precondition {
                step: "pay",
                requirement: "an accepted offer",
            });
        }

        let listing = &product.listing;
        let to = AccountAddress::parse(&listing.seller_address)
            .map_err(|_| BuyerError::InvalidAddress(listing.seller_address.clone()))?;
        let payment = PaymentRequest {
            from: self.config.account,
            to,
            amount: listing.price,
            currency: listing.currency.clone(),
            memo: format!("{} {}", listing.id, listing.title),
        };

        let id = tokio::time::timeout(self.config.payment_timeout, self.deps.payments.pay(&payment))
            .await
            .map_err(|_| PaymentError::Rejected("payment timed out".to_string()))??;
        info!(settlement_id = %id, amount = payment.amount, "Payment executed");
        self.state.payment_id = Some(id.clone());
        Ok(id)
    }

    async fn complete(&mut self) -> PurchaseResult {
        self.state.current_step = BuyerStep::Complete;
        let (Some(product), Some(payment_id)) =
            (self.state.selected_product.clone(), self.state.payment_id.clone())
        else {
            return self.fail(BuyerError::Precondition {
                step: "complete",
                requirement: "a settled payment",
            });
        };
        let listing = &product.listing;

        let notice = PaymentNotice {
            product_id: listing.id.clone(),
            settlement_id: payment_id.clone(),
            amount: listing.price,
            currency: listing.currency.clone(),
            payer: self.config.account.to_string(),
        };
        let shipment = match serde_json::to_value(&notice) {
            Ok(value) => {
                let message = Message::buyer_text(format!(
                    "Paid {} {} for {} (settlement {}).",
                    listing.price, listing.currency, listing.title, payment_id
                ))
                .with_action(actions::PAYMENT_NOTIFICATION)
                .with_metadata(metadata_keys::PAYMENT, value);
                self.notify_seller(&product.seller, message).await
            }
            Err(err) => {
                warn!(error = %err, "Could not encode payment notice");
                None
            }
        };

        if shipment.is_none() {
            warn!(settlement_id = %payment_id, seller = %product.seller, "No shipment confirmation; payment stands");
        }
        info!(product_id = %listing.id, settlement_id = %payment_id, "Purchase complete");

        PurchaseResult {
            success: true,
            product: Some(product.listing),
            payment_id: Some(payment_id),
            shipment,
            error: None,
        }
    }

    async fn notify_seller(&self, seller: &AgentId, message: Message) -> Option<ShipmentInfo> {
        let task = match self.deps.client.send_and_wait(seller, message, self.config.poll).await {
            Ok(task) => task,
            Err(err) => {
                warn!(seller = %seller, error = %err, "Payment notification failed");
                return None;
            }
        };
        match task.reply()?.metadata_as::<ShipmentInfo>(metadata_keys::SHIPMENT)? {
            Ok(shipment) => Some(shipment),
            Err(err) => {
                warn!(seller = %seller, error = %err, "Malformed shipment confirmation");
                None
            }
        }
    }

    fn fail(&mut self, err: BuyerError) -> PurchaseResult {
        error!(step = ?self.state.current_step, error = %err, "Purchase failed");
        self.state.current_step = BuyerStep::Failed;
        self.state.error = Some(err.to_string());
        PurchaseResult {
            product: self.state.selected_product.as_ref().map(|p| p.listing.clone()),
            payment_id: self.state.payment_id.clone(),
            ..PurchaseResult::failure(err.to_string())
        }
    }
}

impl std::fmt::Debug for BuyerWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuyerWorkflow")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Turn a seller's reply to an offer of `offered` into an outcome.
///
/// Structured response metadata is preferred. Without it the reply text is
/// read heuristically; a reply that says nothing usable excludes the
/// product. A counter above `budget` is never accepted.
pub fn interpret_seller_reply(reply: &Message, offered: f64, budget: f64, currency: &str) -> NegotiationOutcome {
    match reply.metadata_as::<NegotiationResponse>(metadata_keys::NEGOTIATION_RESPONSE) {
        Some(Ok(response)) if response.validate().is_ok() => {
            return match (response.status, response.counter_offer) {
                (NegotiationStatus::Accept, _) => NegotiationOutcome::Agreed(offered),
                (NegotiationStatus::Counter, Some(counter)) => within_budget(counter.offered_price, budget),
                (NegotiationStatus::Counter, None) | (NegotiationStatus::Reject, _) => {
                    NegotiationOutcome::Excluded(response.message)
                }
            };
        }
        Some(_) => warn!("Unusable negotiation metadata, reading reply text"),
        None => {}
    }

    match interpret_reply(&reply.text_content(), currency, offered) {
        ReplySignal::Accepted => NegotiationOutcome::Agreed(offered),
        ReplySignal::PriceQuoted(price) => within_budget(price, budget),
        ReplySignal::Rejected => NegotiationOutcome::Excluded("seller rejected the offer".to_string()),
        ReplySignal::Unclear => NegotiationOutcome::Excluded("seller reply not understood".to_string()),
    }
}

fn within_budget(price: f64, budget: f64) -> NegotiationOutcome {
    if price <= budget {
        NegotiationOutcome::Agreed(price)
    } else {
        NegotiationOutcome::Excluded(format!("counter {price} exceeds budget {budget}"))
    }
}
