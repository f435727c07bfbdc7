//! Application configuration module
//!
//! Type-safe configuration loaded from environment variables using the
//! `config` and `dotenvy` crates. Variables use the `RELAY_BUS` prefix and
//! `__` between nested keys.
//!
//! # Example
//!
//! ```no_run
//! use relay_bus::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Publishing to {}", config.broker.entity_path);
//! ```

mod boxes;
mod broker;
mod database;
mod error;
mod logging;

pub use boxes::BoxesConfig;
pub use broker::BrokerConfig;
pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use logging::LoggingConfig;

use serde::Deserialize;

/// Root configuration
///
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Outbox/inbox polling, retry and retention
    #[serde(default)]
    pub boxes: BoxesConfig,

    /// Broker transport
    #[serde(default)]
    pub broker: BrokerConfig,

    /// PostgreSQL box stores; absent when only in-memory stores are used
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `RELAY_BUS` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    ///
    /// # Environment Variable Format
    ///
    /// - `RELAY_BUS__BROKER__ENTITY_PATH=events` -> `broker.entity_path = "events"`
    /// - `RELAY_BUS__BOXES__OUTBOX_BATCH_SIZE=100` -> `boxes.outbox_batch_size = 100`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("RELAY_BUS")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate every section that is used unconditionally.
    ///
    /// Broker settings are checked when the broker bus connects.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.boxes.validate()?;
        self.logging.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        Ok(())
    }
}
