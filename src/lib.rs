// Core modules
pub mod accounts;
pub mod config;
pub mod db;
pub mod market;
pub mod registry;
pub mod scheduler;
pub mod startup;
pub mod trading;

// Re-export commonly used types
pub use accounts::{AccountStore, InMemoryAccountStore, TradingAccount};
pub use config::Settings;
pub use registry::{ModelConfig, ModelRegistry, ModelSource, RegistryError};
pub use scheduler::{SchedulerError, TaskScheduler, Trigger};
pub use startup::{StartupError, StartupOptions, StartupOrchestrator};
pub use trading::TradingMode;
