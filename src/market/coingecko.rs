use super::PriceFeed;
use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

const COINGECKO_API_BASE: &str = "https://api.coingecko.com/api/v3";
const RATE_LIMIT_RPM: u32 = 30; // Demo API: 30 requests per minute
const MAX_RETRIES: u32 = 3;

// Type alias for the rate limiter to simplify signatures
type CoinGeckoRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// CoinGecko coin id for each tradable symbol
fn coin_id(symbol: &str) -> Option<&'static str> {
    match symbol {
        "BTC" => Some("bitcoin"),
        "ETH" => Some("ethereum"),
        "SOL" => Some("solana"),
        "DOGE" => Some("dogecoin"),
        "XRP" => Some("ripple"),
        "BNB" => Some("binancecoin"),
        _ => None,
    }
}

/// CoinGecko spot price client with rate limiting
///
/// Cloneable; all clones share one rate limiter.
#[derive(Clone)]
pub struct CoinGeckoFeed {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    rate_limiter: Arc<CoinGeckoRateLimiter>,
}

impl CoinGeckoFeed {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::with_base_url(COINGECKO_API_BASE, api_key)
    }

    /// Point the client at another host (used by tests)
    pub fn with_base_url(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        let rpm = NonZeroU32::new(RATE_LIMIT_RPM).context("Rate limit must be non-zero")?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter,
        })
    }

    /// Make a rate-limited API request with retry logic
    async fn make_request(&self, url: &str) -> Result<reqwest::Response> {
        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            let mut request = self.client.get(url);
            if let Some(key) = &self.api_key {
                request = request.header("x-cg-demo-api-key", key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let backoff_secs = 2u64.pow(attempt);
                        tracing::warn!(
                            "CoinGecko returned {}, retrying in {}s (attempt {}/{})",
                            status,
                            backoff_secs,
                            attempt,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                        continue;
                    }

                    // Other errors (4xx) - don't retry
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    anyhow::bail!("CoinGecko API error ({}): {}", status, error_text);
                }
                Err(e) if attempt < MAX_RETRIES => {
                    let backoff_secs = 2u64.pow(attempt);
                    tracing::warn!(
                        "Network error: {}, retrying in {}s (attempt {}/{})",
                        e,
                        backoff_secs,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                }
                Err(e) => anyhow::bail!("Network error after {} retries: {}", MAX_RETRIES, e),
            }
        }

        anyhow::bail!("Failed after {} retries", MAX_RETRIES)
    }
}

#[async_trait]
impl PriceFeed for CoinGeckoFeed {
    async fn fetch_price(&self, symbol: &str) -> Result<f64> {
        let id = coin_id(symbol)
            .ok_or_else(|| anyhow::anyhow!("Unsupported symbol: {}", symbol))?;

        let url = format!("{}/simple/price?ids={}&vs_currencies=usd", self.base_url, id);
        let response = self.make_request(&url).await?;

        let body: HashMap<String, HashMap<String, f64>> = response
            .json()
            .await
            .context("Failed to parse CoinGecko price response")?;

        let price = body
            .get(id)
            .and_then(|quotes| quotes.get("usd"))
            .copied()
            .ok_or_else(|| anyhow::anyhow!("No USD price for {} in response", symbol))?;

        tracing::debug!(symbol = %symbol, price, "Fetched price");
        Ok(price)
    }
}
