use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    price: f64,
    fetched_at: DateTime<Utc>,
}

/// Thread-safe in-memory price cache with a fixed time-to-live
///
/// Expired entries are ignored on read and dropped by [`evict_expired`],
/// which the cache cleanup job calls on its own cadence.
///
/// [`evict_expired`]: PriceCache::evict_expired
#[derive(Clone)]
pub struct PriceCache {
    data: Arc<RwLock<HashMap<String, CachedPrice>>>,
    ttl: Duration,
}

impl PriceCache {
    /// Create a new price cache
    ///
    /// # Arguments
    /// * `ttl` - How long a fetched price stays fresh
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::days(1)),
        }
    }

    /// Fresh price for a symbol, if any
    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.get_at(symbol, Utc::now())
    }

    fn get_at(&self, symbol: &str, now: DateTime<Utc>) -> Option<f64> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.get(symbol)
            .filter(|entry| now - entry.fetched_at < self.ttl)
            .map(|entry| entry.price)
    }

    pub fn insert(&self, symbol: &str, price: f64) {
        self.insert_at(symbol, price, Utc::now());
    }

    fn insert_at(&self, symbol: &str, price: f64, fetched_at: DateTime<Utc>) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.insert(symbol.to_string(), CachedPrice { price, fetched_at });
    }

    /// Drop every expired entry, returning how many were removed
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Utc::now())
    }

    fn evict_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let before = data.len();
        data.retain(|_, entry| now - entry.fetched_at < self.ttl);
        let removed = before - data.len();

        if removed > 0 {
            tracing::debug!("Evicted {} expired prices from cache", removed);
        }

        removed
    }

    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_price_is_served() {
        let cache = PriceCache::new(std::time::Duration::from_secs(60));
        cache.insert("BTC", 65000.0);

        assert_eq!(cache.get("BTC"), Some(65000.0));
        assert_eq!(cache.get("ETH"), None);
    }

    #[test]
    fn test_expired_price_is_ignored() {
        let cache = PriceCache::new(std::time::Duration::from_secs(60));
        let now = Utc::now();
        cache.insert_at("BTC", 65000.0, now - Duration::seconds(61));

        assert_eq!(cache.get_at("BTC", now), None);
        // Still stored until evicted
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evict_expired() {
        let cache = PriceCache::new(std::time::Duration::from_secs(60));
        let now = Utc::now();

        cache.insert_at("BTC", 65000.0, now - Duration::seconds(120));
        cache.insert_at("ETH", 3500.0, now - Duration::seconds(90));
        cache.insert_at("SOL", 150.0, now - Duration::seconds(10));

        assert_eq!(cache.evict_expired_at(now), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_at("SOL", now), Some(150.0));

        assert_eq!(cache.evict_expired_at(now), 0);
    }

    #[test]
    fn test_clones_share_storage() {
        let cache = PriceCache::new(std::time::Duration::from_secs(60));
        let clone = cache.clone();
        clone.insert("DOGE", 0.15);
        assert_eq!(cache.get("DOGE"), Some(0.15));
    }
}
