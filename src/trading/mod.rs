// Trading job callbacks: AI-driven and random order placement
pub mod ai_client;
pub mod ai_trader;
pub mod random_trader;

pub use ai_client::{AiClient, TradeAction, TradeDecision};

use crate::accounts::AccountStore;
use crate::market::PriceFeed;
use crate::registry::ModelRegistry;
use std::sync::Arc;

pub const AI_TRADE_JOB_ID: &str = "ai_crypto_trade";
pub const AUTO_TRADE_JOB_ID: &str = "auto_crypto_trade";

/// Tradable symbols and their display names
pub const SUPPORTED_SYMBOLS: &[(&str, &str)] = &[
    ("BTC", "Bitcoin"),
    ("ETH", "Ethereum"),
    ("SOL", "Solana"),
    ("DOGE", "Dogecoin"),
    ("XRP", "Ripple"),
    ("BNB", "Binance Coin"),
];

/// Symbols priced and offered to the model, in prompt order
pub const AI_TRADING_SYMBOLS: &[&str] = &["BTC", "ETH", "SOL", "BNB", "XRP", "DOGE"];

pub fn symbol_name(symbol: &str) -> Option<&'static str> {
    SUPPORTED_SYMBOLS
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, name)| *name)
}

/// Which trading callback the scheduler drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingMode {
    Ai,
    Random,
}

impl TradingMode {
    pub fn from_use_ai(use_ai: bool) -> Self {
        if use_ai {
            TradingMode::Ai
        } else {
            TradingMode::Random
        }
    }

    pub fn job_id(&self) -> &'static str {
        match self {
            TradingMode::Ai => AI_TRADE_JOB_ID,
            TradingMode::Random => AUTO_TRADE_JOB_ID,
        }
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Ai => write!(f, "AI-driven"),
            TradingMode::Random => write!(f, "random"),
        }
    }
}

/// Everything a trading run needs, shared by every firing of the job
pub struct TradingContext {
    pub store: Arc<dyn AccountStore>,
    pub prices: Arc<dyn PriceFeed>,
    pub registry: Arc<ModelRegistry>,
    pub ai: AiClient,
    /// Upper bound on the share of the balance a single order may use
    pub max_trade_ratio: f64,
}

impl TradingContext {
    /// Execute one trading round in the given mode
    pub async fn run(&self, mode: TradingMode) -> anyhow::Result<()> {
        match mode {
            TradingMode::Ai => ai_trader::place_ai_driven_orders(self).await,
            TradingMode::Random => random_trader::place_random_order(self).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_per_mode() {
        assert_eq!(TradingMode::from_use_ai(true).job_id(), "ai_crypto_trade");
        assert_eq!(TradingMode::from_use_ai(false).job_id(), "auto_crypto_trade");
    }

    #[test]
    fn test_symbol_names() {
        assert_eq!(symbol_name("BNB"), Some("Binance Coin"));
        assert_eq!(symbol_name("PEPE"), None);
        for symbol in AI_TRADING_SYMBOLS {
            assert!(symbol_name(symbol).is_some());
        }
    }
}
