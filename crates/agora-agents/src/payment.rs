//! Payment Executor - settles agreed purchases
//!
//! The executor is a collaborator: given payer, recipient, amount,
//! currency and memo it returns a settlement id or fails. Workflows never
//! retry a failed payment themselves.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use agora_types::SettlementId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::PaymentError;

pub type Result<T> = std::result::Result<T, PaymentError>;

/// Settlement account in `shard.realm.num` form, e.g. `0.0.4515`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountAddress {
    pub shard: u64,
    pub realm: u64,
    pub num: u64,
}

impl AccountAddress {
    pub fn new(shard: u64, realm: u64, num: u64) -> Self {
        Self { shard, realm, num }
    }

    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }
}

impl FromStr for AccountAddress {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || PaymentError::InvalidAddress(s.to_string());
        let mut parts = s.trim().split('.');
        let mut next = || -> Result<u64> {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse().map_err(|_| invalid())
        };
        let address = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(address)
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.shard, self.realm, self.num)
    }
}

impl Serialize for AccountAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AccountAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub from: AccountAddress,
    pub to: AccountAddress,
    pub amount: f64,
    pub currency: String,
    pub memo: String,
}

/// A completed transfer, kept for reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: SettlementId,
    pub request: PaymentRequest,
    pub settled_at: DateTime<Utc>,
}

#[async_trait]
pub trait PaymentExecutor: Send + Sync {
    async fn pay(&self, request: &PaymentRequest) -> Result<SettlementId>;

    async fn balance(&self, account: &AccountAddress) -> Result<f64>;
}

/// In-memory ledger in a single currency
pub struct LedgerPaymentExecutor {
    currency: String,
    balances: RwLock<HashMap<AccountAddress, f64>>,
    settlements: RwLock<HashMap<SettlementId, Settlement>>,
}

impl LedgerPaymentExecutor {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
            balances: RwLock::new(HashMap::new()),
            settlements: RwLock::new(HashMap::new()),
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Credit `amount` to `account`
    pub async fn fund(&self, account: AccountAddress, amount: f64) {
        *self.balances.write().await.entry(account).or_insert(0.0) += amount;
    }

    pub async fn settlement(&self, id: &SettlementId) -> Option<Settlement> {
        self.settlements.read().await.get(id).cloned()
    }

    pub async fn settlement_count(&self) -> usize {
        self.settlements.read().await.len()
    }
}

#[async_trait]
impl PaymentExecutor for LedgerPaymentExecutor {
    async fn pay(&self, request: &PaymentRequest) -> Result<SettlementId> {
        if !request.amount.is_finite() || request.amount <= 0.0 {
            return Err(PaymentError::InvalidAmount {
                amount: request.amount,
            });
        }
        if !request.currency.eq_ignore_ascii_case(&self.currency) {
            return Err(PaymentError::CurrencyMismatch {
                expected: self.currency.clone(),
                actual: request.currency.clone(),
            });
        }

        let mut balances = self.balances.write().await;
        let available = balances.get(&request.from).copied().unwrap_or(0.0);
        if available < request.amount {
            warn!(from = %request.from, needed = request.amount, available, "Payment refused");
            return Err(PaymentError::InsufficientFunds {
                needed: request.amount,
                available,
            });
        }

        balances.insert(request.from, available - request.amount);
        *balances.entry(request.to).or_insert(0.0) += request.amount;
        drop(balances);

        let id = SettlementId::generate();
        self.settlements.write().await.insert(
            id.clone(),
            Settlement {
                id: id.clone(),
                request: request.clone(),
                settled_at: Utc::now(),
            },
        );

        info!(
            settlement_id = %id,
            from = %request.from,
            to = %request.to,
            amount = request.amount,
            currency = %request.currency,
            "Payment settled"
        );
        Ok(id)
    }

    async fn balance(&self, account: &AccountAddress) -> Result<f64> {
        Ok(self.balances.read().await.get(account).copied().unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buyer() -> AccountAddress {
        AccountAddress::new(0, 0, 1001)
    }

    fn seller() -> AccountAddress {
        AccountAddress::new(0, 0, 4515)
    }

    fn request(amount: f64) -> PaymentRequest {
        PaymentRequest {
            from: buyer(),
            to: seller(),
            amount,
            currency: "HBAR".to_string(),
            memo: "lamp".to_string(),
        }
    }

    #[test]
    fn test_address_shape() {
        assert_eq!(AccountAddress::parse("0.0.4515").unwrap(), seller());
        assert_eq!(seller().to_string(), "0.0.4515");
        for bad in ["", "0.0", "0.0.x", "0.0.1.2", "-1.0.5", "0x1234", " . . "] {
            assert!(AccountAddress::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_payment_moves_funds_and_is_recorded() {
        let ledger = LedgerPaymentExecutor::new("HBAR");
        ledger.fund(buyer(), 10.0).await;

        let id = ledger.pay(&request(9.0)).await.unwrap();
        assert_eq!(ledger.balance(&buyer()).await.unwrap(), 1.0);
        assert_eq!(ledger.balance(&seller()).await.unwrap(), 9.0);
        assert_eq!(ledger.settlement(&id).await.unwrap().request.memo, "lamp");
    }

    #[tokio::test]
    async fn test_payment_refusals() {
        let ledger = LedgerPaymentExecutor::new("HBAR");
        ledger.fund(buyer(), 5.0).await;

        assert!(matches!(
            ledger.pay(&request(9.0)).await,
            Err(PaymentError::InsufficientFunds { .. })
        ));
        assert!(matches!(
            ledger.pay(&request(0.0)).await,
            Err(PaymentError::InvalidAmount { .. })
        ));
        let mut other = request(1.0);
        other.currency = "USD".to_string();
        assert!(matches!(
            ledger.pay(&other).await,
            Err(PaymentError::CurrencyMismatch { .. })
        ));
        assert_eq!(ledger.settlement_count().await, 0);
        assert_eq!(ledger.balance(&buyer()).await.unwrap(), 5.0);
    }
}
