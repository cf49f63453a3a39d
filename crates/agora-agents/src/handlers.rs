//! Message handlers exposing the workflows over the task protocol
//!
//! A [`SellerAgent`] hosts one [`SellerWorkflow`] per listing and answers
//! `list_products`, `negotiate` and `payment_notification` messages. A
//! [`BuyerAgent`] turns a purchase request into a full [`BuyerWorkflow`] run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use agora_tasks::{HandlerError, MessageHandler};
use agora_types::{actions, metadata_keys, AgentId, Listing, Message, NegotiationOffer, NegotiationResponse, ProductId};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::buyer::{BuyerConfig, BuyerDeps, BuyerWorkflow, PurchaseRequest, PurchaseResult};
use crate::error::SellerError;
use crate::guard::OracleGuard;
use crate::heuristics::{extract_budget, query_terms, quoted_price};
use crate::oracle::DecisionOracle;
use crate::seller::{PaymentNotice, SaleRecord, SellerStep, SellerWorkflow};

const SELLER_HELP: &str = "I sell things. Ask me to list_products, send a negotiate offer, or a payment_notification.";
const BUYER_HELP: &str = "Tell me what to buy and your budget, e.g. 'a desk lamp, budget 10'.";

fn to_metadata<T: Serialize>(value: &T) -> Result<Value, HandlerError> {
    serde_json::to_value(value).map_err(|e| HandlerError::failed(format!("Failed to encode reply: {e}")))
}

fn invalid(err: impl std::fmt::Display) -> HandlerError {
    HandlerError::InvalidRequest(err.to_string())
}

fn failure(err: SellerError) -> HandlerError {
    HandlerError::failed(err.to_string())
}

// ============================================================================
// Seller
// ============================================================================

type SharedWorkflow = Arc<tokio::sync::Mutex<SellerWorkflow>>;

pub struct SellerAgent {
    address: String,
    oracle: Arc<dyn DecisionOracle>,
    guard: OracleGuard,
    oracle_timeout: Duration,
    /// One workflow per listing, in product id order
    workflows: RwLock<BTreeMap<ProductId, SharedWorkflow>>,
    sales: Mutex<Vec<SaleRecord>>,
}

impl SellerAgent {
    pub fn new(address: impl Into<String>, oracle: Arc<dyn DecisionOracle>) -> Self {
        Self {
            address: address.into(),
            oracle,
            guard: OracleGuard::new(),
            oracle_timeout: Duration::from_secs(30),
            workflows: RwLock::new(BTreeMap::new()),
            sales: Mutex::new(Vec::new()),
        }
    }

    pub fn with_guard(mut self, guard: OracleGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout = timeout;
        self
    }

    /// Publish a draft listing and start its workflow
    pub fn add_listing(&self, listing: Listing) -> Result<Listing, SellerError> {
        let mut workflow = SellerWorkflow::new(listing, self.address.clone(), self.oracle.clone(), self.oracle_timeout)
            .with_guard(self.guard.clone());
        let published = workflow.list()?.clone();

        self.workflows
            .write()
            .insert(published.id.clone(), Arc::new(tokio::sync::Mutex::new(workflow)));
        Ok(published)
    }

    /// Current state of every listing
    pub async fn listings(&self) -> Vec<Listing> {
        let mut listings = Vec::new();
        for workflow in self.snapshot() {
            listings.push(workflow.lock().await.listing().clone());
        }
        listings
    }

    pub fn sales(&self) -> Vec<SaleRecord> {
        self.sales.lock().clone()
    }

    fn snapshot(&self) -> Vec<SharedWorkflow> {
        self.workflows.read().values().cloned().collect()
    }

    fn workflow(&self, product_id: &ProductId) -> Option<SharedWorkflow> {
        self.workflows.read().get(product_id).cloned()
    }

    async fn list_products(&self, message: &Message) -> Result<Message, HandlerError> {
        let query = message
            .metadata
            .get(metadata_keys::QUERY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| message.text_content());
        let terms = query_terms(&query);

        let matching: Vec<Listing> = self
            .listings()
            .await
            .into_iter()
            .filter(|l| l.is_active())
            .filter(|l| {
                let haystack = format!("{} {} {}", l.title, l.description, l.category).to_lowercase();
                terms.is_empty() || terms.iter().any(|t| haystack.contains(t.as_str()))
            })
            .collect();

        let text = if matching.is_empty() {
            "Nothing matching that right now.".to_string()
        } else {
            let items: Vec<String> = matching
                .iter()
                .map(|l| format!("{} ({} {})", l.title, l.price, l.currency))
                .collect();
            format!("Available: {}", items.join("; "))
        };
        debug!(query = %query, count = matching.len(), "Listed products");

        Ok(Message::agent_text(text).with_metadata(metadata_keys::LISTINGS, to_metadata(&matching)?))
    }

    /// Structured offer from metadata, else a price quoted in the text
    fn read_offer(&self, message: &Message, currency: &str) -> Result<NegotiationOffer, HandlerError> {
        match message.metadata_as::<NegotiationOffer>(metadata_keys::NEGOTIATION_OFFER) {
            Some(Ok(offer)) => Ok(offer),
            Some(Err(err)) => Err(invalid(format!("Malformed offer: {err}"))),
            None => {
                let text = message.text_content();
                quoted_price(&text, currency)
                    .map(|price| NegotiationOffer::new(1, price, currency, text.clone()))
                    .ok_or_else(|| invalid("Offer carries no price"))
            }
        }
    }

    async fn negotiate(&self, message: &Message) -> Result<Message, HandlerError> {
        let workflows = self.snapshot();
        let named = message
            .metadata_as::<NegotiationOffer>(metadata_keys::NEGOTIATION_OFFER)
            .and_then(Result::ok)
            .and_then(|o| o.product_id);

        let workflow = match named {
            Some(ref product_id) => self
                .workflow(product_id)
                .ok_or_else(|| invalid(format!("Unknown product {product_id}")))?,
            None if workflows.len() == 1 => workflows[0].clone(),
            None => return Err(invalid("Offer does not name a product")),
        };

        let mut workflow = workflow.lock().await;
        let currency = workflow.listing().currency.clone();
        let offer = self.read_offer(message, &currency)?;

        if !workflow.listing().is_active() || workflow.step() != SellerStep::Wait {
            let response = NegotiationResponse::reject(format!(
                "{} is no longer available.",
                workflow.listing().title
            ));
            return Ok(Message::agent_text(response.message.clone())
                .with_metadata(metadata_keys::NEGOTIATION_RESPONSE, to_metadata(&response)?));
        }

        workflow.submit_offer(offer).map_err(invalid)?;
        workflow.wait();
        let evaluation = workflow.evaluate().await.map_err(failure)?.clone();
        let response = if evaluation.is_accept() {
            workflow.accept().map_err(failure)?
        } else {
            evaluation
        };

        Ok(Message::agent_text(response.message.clone())
            .with_metadata(metadata_keys::NEGOTIATION_RESPONSE, to_metadata(&response)?))
    }

    async fn payment(&self, message: &Message) -> Result<Message, HandlerError> {
        let notice = match message.metadata_as::<PaymentNotice>(metadata_keys::PAYMENT) {
            Some(Ok(notice)) => notice,
            Some(Err(err)) => return Err(invalid(format!("Malformed payment notice: {err}"))),
            None => return Err(invalid("Payment notification carries no payment details")),
        };
        let workflow = self
            .workflow(&notice.product_id)
            .ok_or_else(|| invalid(format!("Unknown product {}", notice.product_id)))?;

        let mut workflow = workflow.lock().await;
        if !notice.currency.eq_ignore_ascii_case(&workflow.listing().currency) {
            return Err(invalid(format!(
                "Paid in {}, listing is priced in {}",
                notice.currency,
                workflow.listing().currency
            )));
        }
        workflow
            .record_payment(notice.amount, notice.settlement_id.clone())
            .map_err(failure)?;
        let record = workflow.ship().map_err(failure)?;
        drop(workflow);

        info!(product_id = %notice.product_id, payer = %notice.payer, price = record.sold_price, "Sale recorded");
        let reply = Message::agent_text(record.shipment_info.message.clone())
            .with_metadata(metadata_keys::SHIPMENT, to_metadata(&record.shipment_info)?);
        self.sales.lock().push(record);
        Ok(reply)
    }
}

#[async_trait]
impl MessageHandler for SellerAgent {
    async fn handle(&self, message: Message, agent_id: &AgentId) -> Result<Message, HandlerError> {
        debug!(agent_id = %agent_id, action = ?message.action(), "Seller received message");
        match message.action() {
            Some(actions::LIST_PRODUCTS) => self.list_products(&message).await,
            Some(actions::NEGOTIATE) => self.negotiate(&message).await,
            Some(actions::PAYMENT_NOTIFICATION) => self.payment(&message).await,
            _ => Ok(Message::agent_text(SELLER_HELP)),
        }
    }
}

impl std::fmt::Debug for SellerAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SellerAgent")
            .field("address", &self.address)
            .field("oracle", &self.oracle.name())
            .field("listings", &self.workflows.read().len())
            .finish()
    }
}

// ============================================================================
// Buyer
// ============================================================================

pub struct BuyerAgent {
    deps: BuyerDeps,
    config: BuyerConfig,
    /// Currency assumed when a request names none
    default_currency: String,
    /// Budget used when a request carries none
    default_budget: Option<f64>,
    history: Mutex<Vec<PurchaseResult>>,
}

impl BuyerAgent {
    pub fn new(deps: BuyerDeps, config: BuyerConfig) -> Self {
        Self {
            deps,
            config,
            default_currency: "HBAR".to_string(),
            default_budget: None,
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn with_default_currency(mut self, currency: impl Into<String>) -> Self {
        self.default_currency = currency.into();
        self
    }

    pub fn with_default_budget(mut self, budget: Option<f64>) -> Self {
        self.default_budget = budget.filter(|b| b.is_finite() && *b > 0.0);
        self
    }

    /// Results of every purchase run so far, oldest first
    pub fn history(&self) -> Vec<PurchaseResult> {
        self.history.lock().clone()
    }

    /// Build a purchase request from metadata, falling back to the text
    fn read_request(&self, message: &Message) -> Option<PurchaseRequest> {
        let text = message.text_content();
        let currency = message
            .metadata
            .get(metadata_keys::CURRENCY)
            .and_then(Value::as_str)
            .map(str::to_string);
        let budget = message
            .metadata
            .get(metadata_keys::BUDGET)
            .and_then(Value::as_f64)
            .or_else(|| extract_budget(&text, currency.as_deref().unwrap_or(&self.default_currency)))
            .or(self.default_budget)?;
        let query = message
            .metadata
            .get(metadata_keys::QUERY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(text);

        Some(PurchaseRequest {
            query,
            budget,
            currency,
        })
    }

    async fn purchase(&self, message: &Message) -> Result<Message, HandlerError> {
        let Some(request) = self.read_request(message) else {
            warn!("Purchase request without a budget");
            let result = PurchaseResult::failure("no budget given");
            return Ok(Message::agent_text(BUYER_HELP).with_metadata(metadata_keys::PURCHASE, to_metadata(&result)?));
        };

        let mut workflow = BuyerWorkflow::new(self.deps.clone(), self.config.clone());
        let result = workflow.execute_purchase(request).await;

        let text = match (&result.product, &result.payment_id) {
            (Some(product), Some(payment_id)) if result.success => format!(
                "Bought {} for {} {} (settlement {}).",
                product.title, product.price, product.currency, payment_id
            ),
            _ => format!(
                "Purchase failed: {}",
                result.error.as_deref().unwrap_or("unknown error")
            ),
        };
        let reply = Message::agent_text(text).with_metadata(metadata_keys::PURCHASE, to_metadata(&result)?);
        self.history.lock().push(result);
        Ok(reply)
    }
}

#[async_trait]
impl MessageHandler for BuyerAgent {
    async fn handle(&self, message: Message, agent_id: &AgentId) -> Result<Message, HandlerError> {
        debug!(agent_id = %agent_id, action = ?message.action(), "Buyer received message");
        match message.action() {
            None | Some(actions::PURCHASE) => self.purchase(&message).await,
            Some(_) => Ok(Message::agent_text(BUYER_HELP)),
        }
    }
}

impl std::fmt::Debug for BuyerAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuyerAgent")
            .field("config", &self.config)
            .field("default_currency", &self.default_currency)
            .field("default_budget", &self.default_budget)
            .finish_non_exhaustive()
    }
}
