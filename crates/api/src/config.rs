//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use domain::{CommissionError, CommissionPolicy, Money};
use settlement::{SettlementConfig, ShippingPolicy};
use thiserror::Error;

/// Errors raised while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid commission policy: {0}")]
    Commission(#[from] CommissionError),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` (default: `"0.0.0.0"`), `PORT` (default: `3000`)
/// - `RUST_LOG` (default: `"info"`), `LOG_FORMAT` (`pretty` or `json`)
/// - `DATABASE_URL`: PostgreSQL connection string; unset runs in memory
/// - `DATABASE_MAX_CONNECTIONS` (default: `10`)
/// - `DEFAULT_CURRENCY` (default: `"usd"`)
/// - `COMMISSION_PERCENT` (default: `10`), `COMMISSION_MIN_CENTS`,
///   `COMMISSION_MAX_CENTS`
/// - `SHIPPING_FLAT_CENTS` (default: `0`), `FREE_SHIPPING_THRESHOLD_CENTS`
/// - `PAYMENT_TIMEOUT_MS` (default: `10000`)
/// - `PAYOUT_MAX_RETRIES` (default: `5`)
/// - `PAYOUT_PROCESSING_LEASE_SECS` (default: `900`): how long a payout may
///   stay `processing` before a sweep reclaims it
/// - `PAYOUT_SWEEP_INTERVAL_SECS`: unset disables the background sweeper
/// - `PAYOUT_SWEEP_BATCH` (default: `50`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub settlement: SettlementConfig,
    pub sweep_interval: Option<Duration>,
    pub sweep_batch: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(lookup);

        let log_format = match env.get("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    value: other.to_string(),
                    reason: "expected pretty or json".to_string(),
                });
            }
        };

        let percent: f64 = env.parse("COMMISSION_PERCENT")?.unwrap_or(10.0);
        let commission = CommissionPolicy::from_percent(percent)?.with_bounds(
            env.parse::<i64>("COMMISSION_MIN_CENTS")?.map(Money::from_cents),
            env.parse::<i64>("COMMISSION_MAX_CENTS")?.map(Money::from_cents),
        )?;

        let mut shipping =
            ShippingPolicy::flat(Money::from_cents(env.parse("SHIPPING_FLAT_CENTS")?.unwrap_or(0)));
        if let Some(threshold) = env.parse::<i64>("FREE_SHIPPING_THRESHOLD_CENTS")? {
            shipping = shipping.with_free_threshold(Money::from_cents(threshold));
        }

        let defaults = SettlementConfig::default();
        let settlement = SettlementConfig {
            currency: env
                .get("DEFAULT_CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or(defaults.currency),
            commission,
            shipping,
            gateway_timeout: env
                .parse("PAYMENT_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.gateway_timeout),
            payout_max_retries: env
                .parse("PAYOUT_MAX_RETRIES")?
                .unwrap_or(defaults.payout_max_retries),
            payout_processing_lease: env
                .parse("PAYOUT_PROCESSING_LEASE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.payout_processing_lease),
            compensation_retry: defaults.compensation_retry,
        };

        let sweep_interval = match env.parse::<u64>("PAYOUT_SWEEP_INTERVAL_SECS")? {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    var: "PAYOUT_SWEEP_INTERVAL_SECS",
                    value: "0".to_string(),
                    reason: "must be positive".to_string(),
                });
            }
            secs => secs.map(Duration::from_secs),
        };

        Ok(Self {
            host: env.get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env.parse("PORT")?.unwrap_or(3000),
            log_level: env.get("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            log_format,
            database_url: env.get("DATABASE_URL"),
            database_max_connections: env.parse("DATABASE_MAX_CONNECTIONS")?.unwrap_or(10),
            settlement,
            sweep_interval,
            sweep_batch: env.parse("PAYOUT_SWEEP_BATCH")?.unwrap_or(50),
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            database_max_connections: 10,
            settlement: SettlementConfig::default(),
            sweep_interval: None,
            sweep_batch: 50,
        }
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Returns the variable if it is set and not blank.
    fn get(&self, var: &str) -> Option<String> {
        (self.0)(var).filter(|value| !value.trim().is_empty())
    }

    fn parse<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(var)
            .map(|value| {
                value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                    var,
                    reason: e.to_string(),
                    value,
                })
            })
            .transpose()
    }
}
