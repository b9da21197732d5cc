use clap::Parser;
use papertrade::accounts::{AccountStore, InMemoryAccountStore};
use papertrade::db::PostgresAccountStore;
use papertrade::market::{CachedPriceFeed, CoinGeckoFeed, PriceCache};
use papertrade::{ModelRegistry, Settings, StartupOptions, StartupOrchestrator};
use std::path::PathBuf;
use std::sync::Arc;

const DEMO_INITIAL_CASH: f64 = 10_000.0;

#[derive(Parser, Debug)]
#[command(author, version, about = "Paper trading engine with scheduled AI traders", long_about = None)]
struct Args {
    /// Settings file (defaults to papertrade.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// AI models file, overrides `models_path`
    #[arg(short, long)]
    models: Option<PathBuf>,

    /// Use random trading instead of the AI models
    #[arg(long)]
    random: bool,

    /// Seconds between trading rounds
    #[arg(long)]
    trading_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(models) = args.models {
        settings.models_path = models;
    }
    if args.random {
        settings.use_ai = false;
    }
    if let Some(secs) = args.trading_interval {
        settings.trading_interval_seconds = secs;
    }
    settings.validate()?;

    setup_logging(&settings.log_filter);

    tracing::info!("🚀 papertrade starting");
    tracing::debug!("{:?}", settings);

    let registry = Arc::new(ModelRegistry::new());
    let cache = PriceCache::new(settings.price_ttl());
    let coingecko = CoinGeckoFeed::new(settings.coingecko_api_key.clone())?;
    let prices = Arc::new(CachedPriceFeed::new(coingecko, cache.clone()));

    let options = StartupOptions::from(&settings);
    let mode = options.mode;

    let (store, demo_store) = open_account_store(settings.database_url.as_deref()).await;

    let orchestrator = StartupOrchestrator::new(options, registry.clone(), store, prices, cache)?;
    orchestrator.load_models()?;

    if let Some(demo_store) = demo_store {
        seed_demo_accounts(&demo_store, &registry);
    }

    if let Err(e) = orchestrator.initialize().await {
        tracing::error!("Startup failed: {}", e);
        orchestrator.shutdown().await;
        return Err(e.into());
    }

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Mode: {}", mode);
    tracing::info!("  Trading: every {}s", settings.trading_interval_seconds);
    tracing::info!("  Cache cleanup: every {}s", settings.cache_cleanup_interval_seconds);
    tracing::info!("  Max trade ratio: {:.0}%", settings.max_trade_ratio * 100.0);
    tracing::info!("\nPress Ctrl+C to stop...\n");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
    }
    tracing::info!("⚠️  Received Ctrl+C, shutting down...");

    orchestrator.shutdown().await;

    tracing::info!("👋 papertrade stopped");
    Ok(())
}

fn setup_logging(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Postgres when configured and reachable, otherwise an in-memory store.
///
/// The in-memory store is also returned by its concrete type so it can be
/// seeded with demo accounts.
async fn open_account_store(
    database_url: Option<&str>,
) -> (Arc<dyn AccountStore>, Option<Arc<InMemoryAccountStore>>) {
    if let Some(url) = database_url {
        match PostgresAccountStore::new(url).await {
            Ok(store) => {
                tracing::info!("Postgres persistence enabled (accounts & orders)");
                let store: Arc<dyn AccountStore> = Arc::new(store);
                return (store, None);
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to connect to Postgres ({:#}), continuing with in-memory accounts",
                    e
                );
            }
        }
    }

    let demo = Arc::new(InMemoryAccountStore::new());
    let store: Arc<dyn AccountStore> = demo.clone();
    (store, Some(demo))
}

/// One demo account per configured model, or a single one when no models
/// are loaded
fn seed_demo_accounts(store: &InMemoryAccountStore, registry: &ModelRegistry) {
    let model_ids = registry.model_ids();

    if model_ids.is_empty() {
        store.add_account("Demo Trader", "random", DEMO_INITIAL_CASH);
    } else {
        for model_id in &model_ids {
            store.add_account(&format!("{} Trader", model_id), model_id, DEMO_INITIAL_CASH);
        }
    }

    tracing::info!(
        "Using in-memory accounts ({} demo accounts with ${:.2} each)",
        model_ids.len().max(1),
        DEMO_INITIAL_CASH
    );
}
