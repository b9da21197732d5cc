// Market data: price sources and the shared price cache
pub mod cache;
pub mod coingecko;

pub use cache::PriceCache;
pub use coingecko::CoinGeckoFeed;

use async_trait::async_trait;
use std::collections::HashMap;

/// Source of the latest USD price for a symbol
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn fetch_price(&self, symbol: &str) -> anyhow::Result<f64>;
}

/// Price feed that serves fresh prices from a [`PriceCache`] and falls back
/// to the wrapped feed on a miss.
pub struct CachedPriceFeed<F> {
    inner: F,
    cache: PriceCache,
}

impl<F: PriceFeed> CachedPriceFeed<F> {
    pub fn new(inner: F, cache: PriceCache) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }
}

#[async_trait]
impl<F: PriceFeed> PriceFeed for CachedPriceFeed<F> {
    async fn fetch_price(&self, symbol: &str) -> anyhow::Result<f64> {
        if let Some(price) = self.cache.get(symbol) {
            return Ok(price);
        }

        let price = self.inner.fetch_price(symbol).await?;
        self.cache.insert(symbol, price);
        Ok(price)
    }
}

/// Fixed prices, handy for demos and tests
#[derive(Debug, Clone, Default)]
pub struct StaticPriceFeed {
    prices: HashMap<String, f64>,
}

impl StaticPriceFeed {
    pub fn new<I, S>(prices: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            prices: prices.into_iter().map(|(s, p)| (s.into(), p)).collect(),
        }
    }
}

#[async_trait]
impl PriceFeed for StaticPriceFeed {
    async fn fetch_price(&self, symbol: &str) -> anyhow::Result<f64> {
        self.prices
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("No price for {}", symbol))
    }
}

/// Fetch prices for several symbols, skipping any that fail or are non-positive
pub async fn fetch_prices(feed: &dyn PriceFeed, symbols: &[&str]) -> HashMap<String, f64> {
    let mut prices = HashMap::new();

    for symbol in symbols {
        match feed.fetch_price(symbol).await {
            Ok(price) if price > 0.0 => {
                prices.insert(symbol.to_string(), price);
            }
            Ok(price) => {
                tracing::debug!("{} returned non-positive price {}", symbol, price);
            }
            Err(e) => {
                tracing::warn!("Failed to get price for {}: {}", symbol, e);
            }
        }
    }

    prices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingFeed {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PriceFeed for CountingFeed {
        async fn fetch_price(&self, _symbol: &str) -> anyhow::Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(42.0)
        }
    }

    #[tokio::test]
    async fn test_cached_feed_reads_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = PriceCache::new(std::time::Duration::from_secs(60));
        let feed = CachedPriceFeed::new(CountingFeed { calls: calls.clone() }, cache.clone());

        assert_eq!(feed.fetch_price("BTC").await.unwrap(), 42.0);
        assert_eq!(feed.fetch_price("BTC").await.unwrap(), 42.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("BTC"), Some(42.0));
    }

    #[tokio::test]
    async fn test_fetch_prices_skips_failures() {
        let feed = StaticPriceFeed::new([("BTC", 65000.0), ("ETH", 0.0)]);
        let prices = fetch_prices(&feed, &["BTC", "ETH", "SOL"]).await;

        assert_eq!(prices.len(), 1);
        assert_eq!(prices["BTC"], 65000.0);
    }
}
