use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::exchange::binance::{ClientConfig, DEFAULT_BASE_URL};
use crate::exchange::signing::{Credentials, RecvWindow};
use crate::execution::retry::RetryPolicy;

const ENV_PREFIX: &str = "SPOTBOT";
const DEFAULT_CONFIG_FILE: &str = "spotbot";

/// Runtime settings.
///
/// Layered: built-in defaults, then `spotbot.toml` (optional), then
/// `SPOTBOT__<FIELD>` environment variables.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub recv_window_ms: u64,
    pub request_timeout_secs: u64,
    pub requests_per_minute: u32,
    /// Concurrent fan-out tasks per round
    pub workers: usize,
    pub task_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub balance_max_attempts: u32,
    pub balance_retry_delay_secs: u64,
    /// Entry limit price as a fraction of the last close
    pub entry_discount: Decimal,
    /// Candles fetched per signal evaluation
    pub kline_limit: usize,
    pub database_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            recv_window_ms: 60_000,
            request_timeout_secs: 10,
            requests_per_minute: 1200,
            workers: 4,
            task_timeout_secs: 30,
            poll_interval_secs: 10,
            balance_max_attempts: 15,
            balance_retry_delay_secs: 10,
            entry_discount: Decimal::new(99, 2),
            kline_limit: 100,
            database_url: None,
        }
    }
}

impl Settings {
    /// Load settings. `file` overrides the default `spotbot.toml` lookup.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let file_source = match file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let mut settings: Settings = config::Config::builder()
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if settings.database_url.is_none() {
            settings.database_url = std::env::var("DATABASE_URL").ok();
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        RecvWindow::new(self.recv_window_ms)?;

        if self.entry_discount <= Decimal::ZERO || self.entry_discount > Decimal::ONE {
            return Err(ConfigError::InvalidEntryDiscount(
                self.entry_discount.to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.kline_limit == 0 {
            return Err(ConfigError::Invalid("kline_limit must be at least 1".into()));
        }
        if self.balance_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "balance_max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        Ok(ClientConfig {
            base_url: self.base_url.clone(),
            recv_window: RecvWindow::new(self.recv_window_ms)?,
            timeout: Duration::from_secs(self.request_timeout_secs),
            requests_per_minute: self.requests_per_minute,
        })
    }

    pub fn balance_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.balance_max_attempts,
            delay: Duration::from_secs(self.balance_retry_delay_secs),
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid("DATABASE_URL is not set".into()))
    }
}

/// Credentials from a two-line file when given, else from the environment
pub fn load_credentials(file: Option<&Path>) -> Result<Credentials, ConfigError> {
    match file {
        Some(path) => Credentials::from_file(path),
        None => Credentials::from_env(),
    }
}
