use super::{ai_trader::Portfolio, TradingContext, SUPPORTED_SYMBOLS};
use crate::accounts::{OrderRequest, OrderSide};
use crate::market::fetch_prices;
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Pick a direction and whole quantity for one symbol.
///
/// Buys are bounded by both `max_value / price` and the cash on hand; sells
/// by the units held (and by `max_value / price` when that allows at least
/// one unit). Returns `None` when neither side is executable.
pub fn select_side<R: Rng>(
    rng: &mut R,
    cash: f64,
    price: f64,
    max_value: f64,
    available: u64,
) -> Option<(OrderSide, u64)> {
    if price <= 0.0 || max_value <= 0.0 {
        return None;
    }

    let max_by_value = (max_value / price).floor() as u64;
    let affordable = (cash / price).floor().max(0.0) as u64;

    let mut choices = Vec::with_capacity(2);

    let max_buy = max_by_value.min(affordable);
    if max_buy >= 1 {
        choices.push((OrderSide::Buy, max_buy));
    }

    if available > 0 {
        let max_sell = if max_by_value >= 1 {
            available.min(max_by_value)
        } else {
            available
        };
        choices.push((OrderSide::Sell, max_sell));
    }

    let (side, max_qty) = *choices.choose(rng)?;
    Some((side, rng.gen_range(1..=max_qty)))
}

/// Place one random order for one random eligible account
pub async fn place_random_order(ctx: &TradingContext) -> Result<()> {
    let mut rng = StdRng::from_entropy();
    place_random_order_with(ctx, &mut rng).await
}

pub async fn place_random_order_with<R: Rng + Send>(
    ctx: &TradingContext,
    rng: &mut R,
) -> Result<()> {
    let accounts = ctx
        .store
        .list_eligible_accounts()
        .await
        .context("Failed to list eligible accounts")?;

    let Some(account) = accounts.choose(rng).cloned() else {
        tracing::debug!("No available accounts, skipping auto order placement");
        return Ok(());
    };

    let holdings = ctx.store.holdings(account.id).await?;
    let held: Vec<&str> = holdings.iter().map(|h| h.symbol.as_str()).collect();
    let held_prices = fetch_prices(ctx.prices.as_ref(), &held).await;
    let portfolio = Portfolio::new(account.cash, holdings, &held_prices);

    if portfolio.total_assets <= 0.0 {
        tracing::debug!(
            "Account {} total assets non-positive, skipping auto order placement",
            account.name
        );
        return Ok(());
    }

    let max_order_value = portfolio.total_assets * ctx.max_trade_ratio;

    let Some((symbol, name)) = SUPPORTED_SYMBOLS.choose(rng).copied() else {
        return Ok(());
    };

    let price = match held_prices.get(symbol) {
        Some(price) => *price,
        None => match ctx.prices.fetch_price(symbol).await {
            Ok(price) => price,
            Err(e) => {
                tracing::warn!("Cannot get price for {}: {}", symbol, e);
                return Ok(());
            }
        },
    };

    let Some((side, quantity)) = select_side(
        rng,
        portfolio.cash,
        price,
        max_order_value,
        portfolio.available(symbol),
    ) else {
        tracing::debug!(
            "Account {} has no executable direction for {}, skipping",
            account.name,
            symbol
        );
        return Ok(());
    };

    let order = OrderRequest {
        symbol: symbol.to_string(),
        name: name.to_string(),
        side,
        quantity,
        price,
    };

    let receipt = ctx.store.place_order(account.id, &order).await?;

    tracing::info!(
        "Auto order executed: account={} {} {} {} quantity={}",
        account.name,
        side,
        symbol,
        receipt.order_no,
        quantity
    );

    Ok(())
}
