// Trading account persistence seam
pub mod memory;

pub use memory::InMemoryAccountStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An account that may take part in automated trading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingAccount {
    pub id: i64,
    pub name: String,
    pub model_id: String,
    pub cash: f64,
}

/// Quantity of one symbol held by an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub quantity: u64,
    pub avg_cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Market order at a reference price
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub name: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub price: f64,
}

impl OrderRequest {
    pub fn notional(&self) -> f64 {
        self.quantity as f64 * self.price
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderReceipt {
    pub order_no: String,
    pub executed: bool,
}

/// Account and order persistence used by the trading jobs.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Active accounts configured for automated trading
    async fn list_eligible_accounts(&self) -> anyhow::Result<Vec<TradingAccount>>;

    async fn count_eligible_accounts(&self) -> anyhow::Result<usize> {
        Ok(self.list_eligible_accounts().await?.len())
    }

    async fn holdings(&self, account_id: i64) -> anyhow::Result<Vec<Holding>>;

    async fn place_order(
        &self,
        account_id: i64,
        order: &OrderRequest,
    ) -> anyhow::Result<OrderReceipt>;
}

/// Human-readable order number, e.g. `ORD-20240304-1a2b3c4d`
pub fn new_order_no() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("ORD-{}-{}", chrono::Utc::now().format("%Y%m%d"), &id[..8])
}
