//! Logging configuration

use serde::Deserialize;

use super::error::ValidationError;

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            return Err(ValidationError::InvalidLogLevel(self.level.clone()));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
