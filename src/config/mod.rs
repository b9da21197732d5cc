use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "papertrade.toml";
const ENV_PREFIX: &str = "PAPERTRADE";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Runtime settings.
///
/// Sources, lowest precedence first: built-in defaults, the optional config
/// file, then `PAPERTRADE_*` environment variables.
#[derive(Clone, Deserialize)]
pub struct Settings {
    pub trading_interval_seconds: u64,
    pub cache_cleanup_interval_seconds: u64,
    /// Largest share of the balance one order may use
    pub max_trade_ratio: f64,
    pub use_ai: bool,
    pub models_path: PathBuf,
    /// In-memory accounts when unset
    pub database_url: Option<String>,
    pub price_ttl_seconds: u64,
    pub coingecko_api_key: Option<String>,
    pub log_filter: String,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("trading_interval_seconds", &self.trading_interval_seconds)
            .field("cache_cleanup_interval_seconds", &self.cache_cleanup_interval_seconds)
            .field("max_trade_ratio", &self.max_trade_ratio)
            .field("use_ai", &self.use_ai)
            .field("models_path", &self.models_path)
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .field("price_ttl_seconds", &self.price_ttl_seconds)
            .field("coingecko_api_key", &self.coingecko_api_key.as_ref().map(|_| "<redacted>"))
            .field("log_filter", &self.log_filter)
            .finish()
    }
}

fn with_defaults(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
    builder
        .set_default("trading_interval_seconds", 300_i64)?
        .set_default("cache_cleanup_interval_seconds", 120_i64)?
        .set_default("max_trade_ratio", 0.2)?
        .set_default("use_ai", true)?
        .set_default("models_path", "ai_models.json")?
        .set_default("price_ttl_seconds", 60_i64)?
        .set_default("log_filter", "papertrade=info")
}

impl Settings {
    /// Load settings from `path` (or `papertrade.toml` if present) and the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let mut settings: Settings = with_defaults(Config::builder())?
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()?
            .try_deserialize()?;

        // Conventional unprefixed variables
        if settings.database_url.is_none() {
            settings.database_url = std::env::var("DATABASE_URL").ok();
        }
        if settings.coingecko_api_key.is_none() {
            settings.coingecko_api_key = std::env::var("COINGECKO_API_KEY").ok();
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Settings from defaults plus a TOML document, without touching the
    /// environment.
    pub fn from_toml(text: &str) -> Result<Self, SettingsError> {
        let settings: Settings = with_defaults(Config::builder())?
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.trading_interval_seconds < 1 {
            return Err(SettingsError::Invalid {
                field: "trading_interval_seconds",
                reason: "must be at least 1 second".into(),
            });
        }
        if self.cache_cleanup_interval_seconds < 1 {
            return Err(SettingsError::Invalid {
                field: "cache_cleanup_interval_seconds",
                reason: "must be at least 1 second".into(),
            });
        }
        if !(self.max_trade_ratio > 0.0 && self.max_trade_ratio <= 1.0) {
            return Err(SettingsError::Invalid {
                field: "max_trade_ratio",
                reason: format!("{} is outside (0, 1]", self.max_trade_ratio),
            });
        }
        Ok(())
    }

    pub fn trading_interval(&self) -> Duration {
        Duration::from_secs(self.trading_interval_seconds)
    }

    pub fn cache_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cache_cleanup_interval_seconds)
    }

    pub fn price_ttl(&self) -> Duration {
        Duration::from_secs(self.price_ttl_seconds)
    }
}
