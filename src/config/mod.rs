//! Configuration module - environment variable parsing

use std::env;
use std::time::Duration;

use crate::util::time::{budget_for_rate, DEFAULT_TICK_RATE_HZ};

/// Default bot port the engine dials when none is configured
pub const DEFAULT_BOT_PORT: u16 = 17357;

const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 500;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Port the engine connects to
    pub bot_port: u16,
    /// How long one frame may take before the fallback output is served
    pub tick_budget: Duration,
    /// Bound on worker teardown at shutdown
    pub shutdown_grace: Duration,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_port = match env::var("BOT_PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidNumber("BOT_PORT", raw))?,
            Err(_) => DEFAULT_BOT_PORT,
        };

        // An explicit budget wins; otherwise derive it from the tick rate.
        let tick_budget = match env::var("TICK_BUDGET_MS") {
            Ok(raw) => {
                let ms: u64 = raw
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber("TICK_BUDGET_MS", raw))?;
                Duration::from_millis(ms)
            }
            Err(_) => {
                let rate = match env::var("TICK_RATE_HZ") {
                    Ok(raw) => raw
                        .parse()
                        .map_err(|_| ConfigError::InvalidNumber("TICK_RATE_HZ", raw))?,
                    Err(_) => DEFAULT_TICK_RATE_HZ,
                };
                budget_for_rate(rate)
            }
        };

        let shutdown_grace = match env::var("SHUTDOWN_GRACE_MS") {
            Ok(raw) => {
                let ms: u64 = raw
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber("SHUTDOWN_GRACE_MS", raw))?;
                Duration::from_millis(ms)
            }
            Err(_) => Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
        };

        Ok(Self {
            bot_port,
            tick_budget,
            shutdown_grace,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid {0} value: {1}")]
    InvalidNumber(&'static str, String),
}
