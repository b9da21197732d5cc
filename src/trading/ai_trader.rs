//! AI-driven trading round.
//!
//! Every eligible account whose model is in the registry gets its portfolio
//! and the latest prices sent to its model. The model answers with a
//! buy/sell/hold decision which is validated, sized, and placed as a market
//! order. One account failing never stops the others.

use super::{symbol_name, TradeAction, TradingContext, AI_TRADING_SYMBOLS};
use crate::accounts::{Holding, OrderReceipt, OrderRequest, OrderSide, TradingAccount};
use crate::market::fetch_prices;
use crate::registry::ModelConfig;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Serialize)]
struct PositionView {
    quantity: u64,
    avg_cost: f64,
    current_value: f64,
}

/// Account snapshot handed to the model
#[derive(Debug, Clone)]
pub struct Portfolio {
    pub cash: f64,
    pub holdings: Vec<Holding>,
    pub total_assets: f64,
}

impl Portfolio {
    /// Holdings are valued at the latest price, or at cost when no price is known
    pub fn new(cash: f64, holdings: Vec<Holding>, prices: &HashMap<String, f64>) -> Self {
        let positions_value: f64 = holdings
            .iter()
            .map(|h| {
                let price = prices.get(&h.symbol).copied().unwrap_or(h.avg_cost);
                h.quantity as f64 * price
            })
            .sum();

        Self {
            cash,
            holdings,
            total_assets: cash + positions_value,
        }
    }

    pub fn available(&self, symbol: &str) -> u64 {
        self.holdings
            .iter()
            .find(|h| h.symbol == symbol)
            .map(|h| h.quantity)
            .unwrap_or(0)
    }

    fn positions_json(&self) -> String {
        let view: BTreeMap<&str, PositionView> = self
            .holdings
            .iter()
            .filter(|h| h.quantity > 0)
            .map(|h| {
                (
                    h.symbol.as_str(),
                    PositionView {
                        quantity: h.quantity,
                        avg_cost: h.avg_cost,
                        current_value: h.quantity as f64 * h.avg_cost,
                    },
                )
            })
            .collect();
        serde_json::to_string_pretty(&view).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Prompt asking the model for a single JSON decision
pub fn build_prompt(portfolio: &Portfolio, prices: &HashMap<String, f64>) -> String {
    let sorted: BTreeMap<&String, &f64> = prices.iter().collect();
    let prices_json = serde_json::to_string_pretty(&sorted).unwrap_or_else(|_| "{}".to_string());

    format!(
        r#"You are a cryptocurrency trading AI. Based on the following portfolio and market data, decide on a trading action.

Portfolio Data:
- Cash Available: ${cash:.2}
- Total Assets: ${total:.2}
- Current Positions: {positions}

Current Market Prices:
{prices}

Analyze the market and portfolio, then respond with ONLY a JSON object in this exact format:
{{
  "operation": "buy" or "sell" or "hold",
  "symbol": "BTC" or "ETH" or "SOL" or "BNB" or "XRP" or "DOGE",
  "target_portion_of_balance": 0.2,
  "reason": "Brief explanation of your decision"
}}

Rules:
- operation must be "buy", "sell", or "hold"
- For "buy": symbol is what to buy, target_portion_of_balance is % of cash to use (0.0-1.0)
- For "sell": symbol is what to sell, target_portion_of_balance is % of position to sell (0.0-1.0)
- For "hold": no action taken
- Keep target_portion_of_balance between 0.1 and 0.3 for risk management
- Only choose symbols you have data for"#,
        cash = portfolio.cash,
        total = portfolio.total_assets,
        positions = portfolio.positions_json(),
        prices = prices_json,
    )
}

/// Whole units affordable with `portion` of `cash`
pub fn buy_quantity(cash: f64, portion: f64, price: f64) -> u64 {
    if cash <= 0.0 || price <= 0.0 || portion <= 0.0 {
        return 0;
    }
    (cash * portion / price).floor() as u64
}

/// At least one unit, never more than is held
pub fn sell_quantity(available: u64, portion: f64) -> u64 {
    if available == 0 {
        return 0;
    }
    ((available as f64 * portion).floor() as u64).clamp(1, available)
}

/// Turn a validated action into a market order, or `None` when there is
/// nothing to do.
pub fn size_order(
    action: &TradeAction,
    portfolio: &Portfolio,
    prices: &HashMap<String, f64>,
    max_trade_ratio: f64,
) -> Option<OrderRequest> {
    let (symbol, portion, side) = match action {
        TradeAction::Hold => return None,
        TradeAction::Buy { symbol, portion } => (symbol, *portion, OrderSide::Buy),
        TradeAction::Sell { symbol, portion } => (symbol, *portion, OrderSide::Sell),
    };

    let price = prices.get(symbol).copied().filter(|p| *p > 0.0)?;
    let portion = portion.min(max_trade_ratio);

    let quantity = match side {
        OrderSide::Buy => buy_quantity(portfolio.cash, portion, price),
        OrderSide::Sell => sell_quantity(portfolio.available(symbol), portion),
    };

    if quantity == 0 {
        tracing::info!("Calculated {} quantity < 1 for {}, skipping", side, symbol);
        return None;
    }

    Some(OrderRequest {
        symbol: symbol.clone(),
        name: symbol_name(symbol)
            .map(str::to_string)
            .unwrap_or_else(|| symbol.clone()),
        side,
        quantity,
        price,
    })
}

/// Run one AI trading round over every eligible account
pub async fn place_ai_driven_orders(ctx: &TradingContext) -> Result<()> {
    let accounts = ctx
        .store
        .list_eligible_accounts()
        .await
        .context("Failed to list eligible accounts")?;

    if accounts.is_empty() {
        tracing::debug!("No eligible accounts, skipping AI trading");
        return Ok(());
    }

    let prices = fetch_prices(ctx.prices.as_ref(), AI_TRADING_SYMBOLS).await;
    if prices.is_empty() {
        tracing::warn!("Failed to fetch market prices, skipping AI trading");
        return Ok(());
    }

    let mut placed = 0;
    let mut failed = 0;

    for account in &accounts {
        let Some(model) = ctx.registry.get(&account.model_id) else {
            tracing::debug!(
                "Account {} uses unknown model '{}', skipping",
                account.name,
                account.model_id
            );
            continue;
        };

        match trade_account(ctx, account, &model, &prices).await {
            Ok(Some(_)) => placed += 1,
            Ok(None) => {}
            Err(e) => {
                failed += 1;
                tracing::error!("AI trading failed for {}: {:#}", account.name, e);
            }
        }
    }

    tracing::info!(
        "AI trading round complete: {} orders placed, {} accounts failed",
        placed,
        failed
    );

    Ok(())
}

async fn trade_account(
    ctx: &TradingContext,
    account: &TradingAccount,
    model: &ModelConfig,
    prices: &HashMap<String, f64>,
) -> Result<Option<OrderReceipt>> {
    let holdings = ctx.store.holdings(account.id).await?;
    let portfolio = Portfolio::new(account.cash, holdings, prices);

    if portfolio.total_assets <= 0.0 {
        tracing::debug!("Account {} has non-positive total assets, skipping", account.name);
        return Ok(None);
    }

    let prompt = build_prompt(&portfolio, prices);
    let decision = ctx.ai.request_decision(model, &prompt).await?;

    tracing::info!(
        "AI decision for {}: {} {} (portion: {:.2}%) - {}",
        account.name,
        decision.operation,
        decision.symbol,
        decision.target_portion_of_balance * 100.0,
        decision.reason
    );

    let action = match decision.validate() {
        Ok(action) => action,
        Err(e) => {
            tracing::warn!("Rejected AI decision for {}: {}", account.name, e);
            return Ok(None);
        }
    };

    if action == TradeAction::Hold {
        tracing::info!("AI decided to HOLD for {}", account.name);
        return Ok(None);
    }

    let Some(order) = size_order(&action, &portfolio, prices, ctx.max_trade_ratio) else {
        return Ok(None);
    };

    let receipt = ctx.store.place_order(account.id, &order).await?;

    tracing::info!(
        "AI order executed: account={} {} {} {} quantity={} reason='{}'",
        account.name,
        order.side,
        order.symbol,
        receipt.order_no,
        order.quantity,
        decision.reason
    );

    Ok(Some(receipt))
}
