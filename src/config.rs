use serde::Deserialize;

use crate::models::Timeframe;
use crate::{Result, ServiceError};

fn default_database_url() -> String {
    "postgres://localhost/pipebot".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_price_timeframe() -> String {
    "1m".to_string()
}

/// Runtime settings, read from the environment (optionally via `.env`).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Timeframe whose newest cached candle prices each execution.
    #[serde(default = "default_price_timeframe")]
    pub price_timeframe: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let raw = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .map_err(|err| ServiceError::Unexpected(err.into()))?;

        raw.try_deserialize()
            .map_err(|err| ServiceError::Unexpected(err.into()))
    }

    pub fn price_timeframe(&self) -> Timeframe {
        self.price_timeframe.parse().unwrap_or(Timeframe::M1)
    }
}
