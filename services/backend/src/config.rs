use anyhow::Context;
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::constants::{
    CASHBACK_TTL_DAYS, MAX_OPERATION_ATTEMPTS, OPERATION_LEASE_MS, RETRY_BACKOFF_BASE_MS,
    RETRY_BACKOFF_MAX_MS, RETRY_JITTER_RATIO,
};
use std::env;
use std::str::FromStr;

use crate::services::{AccrualSettings, RetryPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api_port: u16,
    pub metrics_port: u16,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub fanout: FanoutMode,
    pub ledger: LedgerConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// Where ledger events are published
///
/// `Local` delivers straight to this process's connections. `Redis` goes
/// through the pub/sub bridge so events raised by other processes (the
/// processor's retry sweeps) reach the same sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanoutMode {
    Local,
    Redis,
}

impl FromStr for FanoutMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(FanoutMode::Local),
            "redis" => Ok(FanoutMode::Redis),
            other => anyhow::bail!("Unknown FANOUT_MODE: {}", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Operator key used for the house-edge fallback row
    pub operator: String,
    pub default_house_edge: Decimal,
    pub cashback_ttl_days: i64,
    pub default_currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: i32,
    pub backoff_base_ms: i64,
    pub backoff_max_ms: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_port: 3001,
            metrics_port: 9090,
            database: DatabaseConfig {
                url: "postgres://localhost/ledger".to_string(),
                pool_size: 20,
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
            },
            fanout: FanoutMode::Local,
            ledger: LedgerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_OPERATION_ATTEMPTS,
            backoff_base_ms: RETRY_BACKOFF_BASE_MS,
            backoff_max_ms: RETRY_BACKOFF_MAX_MS,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .context("API_PORT")?,
            metrics_port: env::var("METRICS_PORT")
                .unwrap_or_else(|_| "9090".to_string())
                .parse()
                .context("METRICS_PORT")?,
            database: DatabaseConfig::from_env()?,
            redis: RedisConfig::from_env(),
            fanout: env::var("FANOUT_MODE")
                .unwrap_or_else(|_| "local".to_string())
                .parse()?,
            ledger: LedgerConfig::from_env()?,
            retry: RetryConfig::from_env()?,
        })
    }

    pub fn accrual_settings(&self) -> AccrualSettings {
        self.ledger.accrual_settings()
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let settings = AccrualSettings::default();
        Self {
            operator: settings.operator,
            default_house_edge: settings.default_house_edge,
            cashback_ttl_days: settings.cashback_ttl_days,
            default_currency: settings.currency,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = LedgerConfig::default();

        Ok(LedgerConfig {
            operator: env::var("PROVIDER_OPERATOR").unwrap_or(defaults.operator),
            default_house_edge: match env::var("DEFAULT_HOUSE_EDGE") {
                Ok(value) => value.parse().context("DEFAULT_HOUSE_EDGE")?,
                Err(_) => defaults.default_house_edge,
            },
            cashback_ttl_days: env::var("CASHBACK_TTL_DAYS")
                .unwrap_or_else(|_| CASHBACK_TTL_DAYS.to_string())
                .parse()
                .context("CASHBACK_TTL_DAYS")?,
            default_currency: env::var("DEFAULT_CURRENCY").unwrap_or(defaults.default_currency),
        })
    }

    pub fn accrual_settings(&self) -> AccrualSettings {
        AccrualSettings {
            operator: self.operator.clone(),
            default_house_edge: self.default_house_edge,
            cashback_ttl_days: self.cashback_ttl_days,
            currency: self.default_currency.clone(),
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            pool_size: env::var("DATABASE_POOL_SIZE")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("DATABASE_POOL_SIZE")?,
        })
    }
}

impl RedisConfig {
    pub fn from_env() -> Self {
        RedisConfig {
            url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        }
    }
}

impl RetryConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(RetryConfig {
            max_attempts: env::var("RETRY_MAX_ATTEMPTS")
                .unwrap_or_else(|_| MAX_OPERATION_ATTEMPTS.to_string())
                .parse()
                .context("RETRY_MAX_ATTEMPTS")?,
            backoff_base_ms: env::var("RETRY_BACKOFF_BASE_MS")
                .unwrap_or_else(|_| RETRY_BACKOFF_BASE_MS.to_string())
                .parse()
                .context("RETRY_BACKOFF_BASE_MS")?,
            backoff_max_ms: env::var("RETRY_BACKOFF_MAX_MS")
                .unwrap_or_else(|_| RETRY_BACKOFF_MAX_MS.to_string())
                .parse()
                .context("RETRY_BACKOFF_MAX_MS")?,
        })
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_base_ms: self.backoff_base_ms,
            backoff_max_ms: self.backoff_max_ms,
            jitter_ratio: RETRY_JITTER_RATIO,
            lease_ms: OPERATION_LEASE_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fanout_mode_parsing() {
        assert_eq!("local".parse::<FanoutMode>().unwrap(), FanoutMode::Local);
        assert_eq!("REDIS".parse::<FanoutMode>().unwrap(), FanoutMode::Redis);
        assert!("kafka".parse::<FanoutMode>().is_err());
    }

    #[test]
    fn test_default_retry_policy_matches_constants() {
        let policy = Config::default().retry.policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff_base_ms, 1000);
        assert_eq!(policy.backoff_max_ms, 30000);
    }
}
