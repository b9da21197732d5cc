use super::{
    new_order_no, AccountStore, Holding, OrderReceipt, OrderRequest, OrderSide, TradingAccount,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A filled order as recorded by the in-memory store
#[derive(Debug, Clone, PartialEq)]
pub struct FilledOrder {
    pub order_no: String,
    pub account_id: i64,
    pub order: OrderRequest,
}

#[derive(Debug)]
struct AccountRecord {
    account: TradingAccount,
    active: bool,
    holdings: HashMap<String, Holding>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    accounts: Vec<AccountRecord>,
    orders: Vec<FilledOrder>,
}

/// Account store kept in process memory.
///
/// Market orders fill immediately at the reference price. Used when no
/// database is configured and throughout the tests.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    inner: Mutex<Inner>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an active account and return its id
    pub fn add_account(&self, name: &str, model_id: &str, cash: f64) -> i64 {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.accounts.push(AccountRecord {
            account: TradingAccount {
                id,
                name: name.to_string(),
                model_id: model_id.to_string(),
                cash,
            },
            active: true,
            holdings: HashMap::new(),
        });
        id
    }

    pub fn set_active(&self, account_id: i64, active: bool) -> bool {
        let mut inner = self.lock();
        match inner.accounts.iter_mut().find(|r| r.account.id == account_id) {
            Some(record) => {
                record.active = active;
                true
            }
            None => false,
        }
    }

    /// Seed a holding directly (bypassing cash)
    pub fn set_holding(&self, account_id: i64, symbol: &str, quantity: u64, avg_cost: f64) {
        let mut inner = self.lock();
        if let Some(record) = inner.accounts.iter_mut().find(|r| r.account.id == account_id) {
            record.holdings.insert(
                symbol.to_string(),
                Holding {
                    symbol: symbol.to_string(),
                    quantity,
                    avg_cost,
                },
            );
        }
    }

    pub fn account(&self, account_id: i64) -> Option<TradingAccount> {
        self.lock()
            .accounts
            .iter()
            .find(|r| r.account.id == account_id)
            .map(|r| r.account.clone())
    }

    pub fn orders(&self) -> Vec<FilledOrder> {
        self.lock().orders.clone()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn list_eligible_accounts(&self) -> anyhow::Result<Vec<TradingAccount>> {
        Ok(self
            .lock()
            .accounts
            .iter()
            .filter(|r| r.active)
            .map(|r| r.account.clone())
            .collect())
    }

    async fn holdings(&self, account_id: i64) -> anyhow::Result<Vec<Holding>> {
        let inner = self.lock();
        let record = inner
            .accounts
            .iter()
            .find(|r| r.account.id == account_id)
            .ok_or_else(|| anyhow::anyhow!("Account {} not found", account_id))?;

        let mut holdings: Vec<Holding> = record
            .holdings
            .values()
            .filter(|h| h.quantity > 0)
            .cloned()
            .collect();
        holdings.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(holdings)
    }

    async fn place_order(
        &self,
        account_id: i64,
        order: &OrderRequest,
    ) -> anyhow::Result<OrderReceipt> {
        if order.quantity == 0 {
            anyhow::bail!("Order quantity must be positive");
        }

        let mut inner = self.lock();
        let record = inner
            .accounts
            .iter_mut()
            .find(|r| r.account.id == account_id)
            .ok_or_else(|| anyhow::anyhow!("Account {} not found", account_id))?;

        let notional = order.notional();
        match order.side {
            OrderSide::Buy => {
                if record.account.cash < notional {
                    anyhow::bail!(
                        "Insufficient cash: need ${:.2}, have ${:.2}",
                        notional,
                        record.account.cash
                    );
                }
                record.account.cash -= notional;

                let holding = record
                    .holdings
                    .entry(order.symbol.clone())
                    .or_insert_with(|| Holding {
                        symbol: order.symbol.clone(),
                        quantity: 0,
                        avg_cost: 0.0,
                    });
                let total_cost = holding.avg_cost * holding.quantity as f64 + notional;
                holding.quantity += order.quantity;
                holding.avg_cost = total_cost / holding.quantity as f64;
            }
            OrderSide::Sell => {
                let available = record
                    .holdings
                    .get(&order.symbol)
                    .map(|h| h.quantity)
                    .unwrap_or(0);
                if available < order.quantity {
                    anyhow::bail!(
                        "Insufficient {}: need {}, have {}",
                        order.symbol,
                        order.quantity,
                        available
                    );
                }
                if let Some(holding) = record.holdings.get_mut(&order.symbol) {
                    holding.quantity -= order.quantity;
                }
                record.account.cash += notional;
            }
        }

        let order_no = new_order_no();
        inner.orders.push(FilledOrder {
            order_no: order_no.clone(),
            account_id,
            order: order.clone(),
        });

        Ok(OrderReceipt {
            order_no,
            executed: true,
        })
    }
}
