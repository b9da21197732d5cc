//! Service startup and shutdown.
//!
//! Ties the model registry, the scheduler and the trading callbacks into one
//! initialization sequence. Mandatory steps (scheduler, job registration,
//! model loading in AI mode) abort startup on failure; the readiness report
//! is best-effort and only ever logged.

use crate::accounts::{AccountStore, TradingAccount};
use crate::config::Settings;
use crate::market::{PriceCache, PriceFeed};
use crate::registry::{ModelRegistry, ModelSource, RegistryError};
use crate::scheduler::{SchedulerError, TaskScheduler};
use crate::trading::{AiClient, TradingContext, TradingMode};
use chrono::NaiveTime;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

pub const PRICE_CACHE_CLEANUP_JOB_ID: &str = "price_cache_cleanup";
pub const MARKET_OPEN_JOB_ID: &str = "market_open";
pub const MARKET_CLOSE_JOB_ID: &str = "market_close";

/// US equity session bounds in UTC
const MARKET_OPEN_UTC: (u32, u32) = (14, 30);
const MARKET_CLOSE_UTC: (u32, u32) = (21, 0);

const BANNER: &str = "============================================================";

#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

#[derive(Debug, Clone)]
pub struct StartupOptions {
    pub mode: TradingMode,
    pub trading_interval: Duration,
    pub cache_cleanup_interval: Duration,
    pub max_trade_ratio: f64,
    pub models_source: ModelSource,
}

impl From<&Settings> for StartupOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            mode: TradingMode::from_use_ai(settings.use_ai),
            trading_interval: settings.trading_interval(),
            cache_cleanup_interval: settings.cache_cleanup_interval(),
            max_trade_ratio: settings.max_trade_ratio,
            models_source: ModelSource::File(settings.models_path.clone()),
        }
    }
}

/// Which accounts can trade right now
#[derive(Debug, Clone)]
pub struct ReadinessReport {
    pub mode: TradingMode,
    pub trading_interval: Duration,
    /// Active accounts configured for automated trading
    pub eligible_accounts: usize,
    /// Accounts that will take part in the next trading round
    pub active_accounts: Vec<TradingAccount>,
    /// Eligible accounts skipped because their model is not configured
    pub skipped_accounts: usize,
}

impl ReadinessReport {
    pub fn is_active(&self) -> bool {
        !self.active_accounts.is_empty()
    }

    pub fn log(&self) {
        if self.is_active() {
            tracing::info!("{}", BANNER);
            tracing::info!("✓ {} TRADING IS ACTIVE", self.mode_label());
            tracing::info!(
                "  Active Accounts: {} of {} eligible",
                self.active_accounts.len(),
                self.eligible_accounts
            );
            for account in &self.active_accounts {
                tracing::info!("    - {} (Model: {})", account.name, account.model_id);
            }
            if self.skipped_accounts > 0 {
                tracing::info!(
                    "  Skipped Accounts: {} (model not configured)",
                    self.skipped_accounts
                );
            }
            tracing::info!("  Trading Interval: every {}s", self.trading_interval.as_secs());
            tracing::info!("{}", BANNER);
        } else {
            tracing::warn!("{}", BANNER);
            tracing::warn!("⚠ {} TRADING IS DISABLED", self.mode_label());
            match self.mode {
                TradingMode::Ai => {
                    tracing::warn!("  Reason: No active accounts use a configured AI model");
                    tracing::warn!("  Action Required:");
                    tracing::warn!("    1. Add the model to the models file");
                    tracing::warn!("    2. Point an active account at one of its ids");
                    tracing::warn!(
                        "    3. AI trading starts automatically at the next {}s cycle",
                        self.trading_interval.as_secs()
                    );
                }
                TradingMode::Random => {
                    tracing::warn!("  Reason: No active trading accounts found");
                }
            }
            tracing::warn!("{}", BANNER);
        }
    }

    fn mode_label(&self) -> &'static str {
        match self.mode {
            TradingMode::Ai => "AI",
            TradingMode::Random => "RANDOM",
        }
    }
}

/// Builds and tears down the running service
pub struct StartupOrchestrator {
    options: StartupOptions,
    scheduler: TaskScheduler,
    registry: Arc<ModelRegistry>,
    trading: Arc<TradingContext>,
    cache: PriceCache,
    initial_trade: Mutex<Option<oneshot::Receiver<()>>>,
}

impl StartupOrchestrator {
    pub fn new(
        options: StartupOptions,
        registry: Arc<ModelRegistry>,
        store: Arc<dyn AccountStore>,
        prices: Arc<dyn PriceFeed>,
        cache: PriceCache,
    ) -> Result<Self, StartupError> {
        let ai = AiClient::new().map_err(|e| StartupError::HttpClient(format!("{:#}", e)))?;

        let trading = Arc::new(TradingContext {
            store,
            prices,
            registry: registry.clone(),
            ai,
            max_trade_ratio: options.max_trade_ratio,
        });

        Ok(Self {
            options,
            scheduler: TaskScheduler::new(),
            registry,
            trading,
            cache,
            initial_trade: Mutex::new(None),
        })
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &StartupOptions {
        &self.options
    }

    /// Load the model registry from the configured source.
    ///
    /// Fatal in AI mode. Random trading never consults the registry, so there
    /// a failure is only a warning.
    pub fn load_models(&self) -> Result<usize, StartupError> {
        match self.registry.load(self.options.models_source.clone()) {
            Ok(count) => Ok(count),
            Err(e) if self.options.mode == TradingMode::Random => {
                tracing::warn!("AI models not loaded ({}), continuing in random mode", e);
                Ok(0)
            }
            Err(e) => {
                tracing::error!("Failed to load AI models: {}", e);
                Err(e.into())
            }
        }
    }

    /// Start every service.
    ///
    /// Order: models (if not loaded yet), scheduler, market-hours jobs, the
    /// trading job plus one immediate out-of-band run, the price-cache
    /// cleanup job, then the readiness report.
    pub async fn initialize(&self) -> Result<(), StartupError> {
        if self.registry.is_empty() {
            self.load_models()?;
        }

        if let Err(e) = self.start_services() {
            tracing::error!("Service initialization failed: {}", e);
            return Err(e);
        }

        match self.readiness_report().await {
            Ok(report) => report.log(),
            Err(e) => tracing::error!("Failed to check trading status: {:#}", e),
        }

        tracing::info!("All services initialized successfully");
        Ok(())
    }

    fn start_services(&self) -> Result<(), StartupError> {
        self.scheduler.start();
        tracing::info!("Scheduler service started");

        self.setup_market_tasks()?;
        tracing::info!("Market scheduled tasks have been set up");

        self.schedule_trading()?;
        tracing::info!(
            "Automatic crypto trading task started ({}s interval)",
            self.options.trading_interval.as_secs()
        );

        let cache = self.cache.clone();
        self.scheduler.add_interval_task(
            PRICE_CACHE_CLEANUP_JOB_ID,
            self.options.cache_cleanup_interval,
            move || {
                let removed = cache.evict_expired();
                tracing::debug!("Price cache cleanup removed {} entries", removed);
                std::future::ready(anyhow::Ok(()))
            },
        )?;
        tracing::info!(
            "Price cache cleanup task started ({}s interval)",
            self.options.cache_cleanup_interval.as_secs()
        );

        Ok(())
    }

    fn setup_market_tasks(&self) -> Result<(), StartupError> {
        self.scheduler.add_daily_task(
            MARKET_OPEN_JOB_ID,
            utc_time(MARKET_OPEN_UTC),
            true,
            || async {
                tracing::info!("Executing market open tasks");
                anyhow::Ok(())
            },
        )?;

        self.scheduler.add_daily_task(
            MARKET_CLOSE_JOB_ID,
            utc_time(MARKET_CLOSE_UTC),
            true,
            || async {
                tracing::info!("Executing market close tasks");
                anyhow::Ok(())
            },
        )?;

        Ok(())
    }

    /// Register the trading job for the configured mode and kick off one
    /// immediate run without waiting for it.
    ///
    /// The immediate run is an ordinary run of the job, so a timer firing
    /// that lands while it is still going is skipped and `shutdown` waits
    /// for it.
    pub fn schedule_trading(&self) -> Result<(), StartupError> {
        let mode = self.options.mode;
        tracing::info!("Scheduling {} crypto trading", mode);

        let ctx = self.trading.clone();
        self.scheduler.add_interval_task(
            mode.job_id(),
            self.options.trading_interval,
            move || {
                let ctx = ctx.clone();
                async move { ctx.run(mode).await }
            },
        )?;

        match self.scheduler.run_now(mode.job_id()) {
            Some(done) => {
                tracing::info!("Initial auto-trading execution started");
                *self
                    .initial_trade
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(done);
            }
            None => tracing::warn!("Initial auto-trading execution was not started"),
        }

        Ok(())
    }

    /// Completion signal of the immediate first trade, if one was started and
    /// not yet taken. Resolves once the run has ended, successfully or not.
    pub fn take_initial_trade(&self) -> Option<oneshot::Receiver<()>> {
        self.initial_trade
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Count the accounts that can take part in automated trading
    pub async fn readiness_report(&self) -> anyhow::Result<ReadinessReport> {
        let store = &self.trading.store;
        let eligible_accounts = store.count_eligible_accounts().await?;

        let active_accounts = if eligible_accounts == 0 {
            Vec::new()
        } else {
            let mut accounts = store.list_eligible_accounts().await?;
            if self.options.mode == TradingMode::Ai {
                accounts.retain(|account| self.registry.is_valid(&account.model_id));
            }
            accounts
        };

        Ok(ReadinessReport {
            mode: self.options.mode,
            trading_interval: self.options.trading_interval,
            eligible_accounts,
            skipped_accounts: eligible_accounts.saturating_sub(active_accounts.len()),
            active_accounts,
        })
    }

    /// Stop the scheduler. Never fails; problems are logged.
    pub async fn shutdown(&self) {
        match self.scheduler.stop().await {
            Ok(()) => tracing::info!("All services have been shut down"),
            Err(e) => tracing::error!("Failed to shut down services: {}", e),
        }
    }
}

fn utc_time((hour, minute): (u32, u32)) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::InMemoryAccountStore;
    use crate::market::StaticPriceFeed;
    use crate::scheduler::Trigger;

    fn options(mode: TradingMode, models: &str) -> StartupOptions {
        StartupOptions {
            mode,
            trading_interval: Duration::from_secs(300),
            cache_cleanup_interval: Duration::from_secs(120),
            max_trade_ratio: 0.2,
            models_source: ModelSource::Inline(models.to_string()),
        }
    }

    fn orchestrator(mode: TradingMode, models: &str) -> StartupOrchestrator {
        let store = Arc::new(InMemoryAccountStore::new());
        StartupOrchestrator::new(
            options(mode, models),
            Arc::new(ModelRegistry::new()),
            store,
            Arc::new(StaticPriceFeed::default()),
            PriceCache::new(Duration::from_secs(60)),
        )
        .unwrap()
    }

    #[test]
    fn test_options_from_settings() {
        let settings = Settings::from_toml("use_ai = false\ntrading_interval_seconds = 42").unwrap();
        let options = StartupOptions::from(&settings);

        assert_eq!(options.mode, TradingMode::Random);
        assert_eq!(options.trading_interval, Duration::from_secs(42));
        assert_eq!(options.cache_cleanup_interval, Duration::from_secs(120));
        assert_eq!(
            options.models_source,
            ModelSource::File("ai_models.json".into())
        );
    }

    #[test]
    fn test_market_hours() {
        assert_eq!(utc_time(MARKET_OPEN_UTC), NaiveTime::from_hms_opt(14, 30, 0).unwrap());
        assert_eq!(utc_time(MARKET_CLOSE_UTC), NaiveTime::from_hms_opt(21, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_model_load_fatal_in_ai_mode() {
        let orchestrator = orchestrator(TradingMode::Ai, r#"{"models": []}"#);
        let result = orchestrator.initialize().await;

        assert!(matches!(
            result,
            Err(StartupError::Registry(RegistryError::ConfigInvalid(_)))
        ));
        assert!(!orchestrator.scheduler().is_running());
    }

    #[tokio::test]
    async fn test_model_load_optional_in_random_mode() {
        let orchestrator = orchestrator(TradingMode::Random, "not json");
        orchestrator.initialize().await.unwrap();

        assert!(orchestrator.scheduler().is_running());
        assert!(orchestrator.scheduler().has_task("auto_crypto_trade"));
        assert!(!orchestrator.scheduler().has_task("ai_crypto_trade"));

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_registers_all_jobs() {
        let orchestrator = orchestrator(
            TradingMode::Ai,
            r#"{"models": [{"id": "gpt", "display_name": "GPT", "model": "gpt-4o-mini",
                "base_url": "http://127.0.0.1:1", "secret": "sk"}]}"#,
        );
        orchestrator.initialize().await.unwrap();

        let jobs = orchestrator.scheduler().list_jobs();
        let ids: Vec<&str> = jobs.iter().map(|job| job.job_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["ai_crypto_trade", "market_close", "market_open", "price_cache_cleanup"]
        );
        assert_eq!(jobs[0].trigger, Trigger::Interval(Duration::from_secs(300)));
        assert_eq!(jobs[3].trigger, Trigger::Interval(Duration::from_secs(120)));

        // No accounts, so the first trade finishes straight away
        let first = orchestrator.take_initial_trade().unwrap();
        first.await.unwrap();

        orchestrator.shutdown().await;
        assert!(orchestrator.scheduler().list_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_second_initialize_is_duplicate() {
        let orchestrator = orchestrator(TradingMode::Random, r#"{"models": []}"#);
        orchestrator.initialize().await.unwrap();

        let result = orchestrator.initialize().await;
        assert!(matches!(
            result,
            Err(StartupError::Scheduler(SchedulerError::DuplicateJobId(_)))
        ));

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_without_start() {
        let orchestrator = orchestrator(TradingMode::Random, r#"{"models": []}"#);
        orchestrator.shutdown().await;
        assert!(!orchestrator.scheduler().is_running());
    }
}
