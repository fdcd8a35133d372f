use anyhow::Context;
use backend::config::{DatabaseConfig, FanoutMode, LedgerConfig, RedisConfig, RetryConfig};
use serde::Deserialize;
use shared::SWEEP_BATCH_SIZE;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub processor: ProcessorConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub fanout: FanoutMode,
    pub ledger: LedgerConfig,
    pub retry: RetryConfig,
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    pub sweep_interval_seconds: u64,
    pub sweep_batch_size: i64,
    pub expiry_interval_seconds: u64,
    pub reconcile_interval_seconds: u64,
    pub reconcile_batch_size: i64,
    pub breaker_failure_threshold: u64,
    pub breaker_reset_seconds: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 1,
            sweep_batch_size: SWEEP_BATCH_SIZE,
            expiry_interval_seconds: 3600,
            reconcile_interval_seconds: 300,
            reconcile_batch_size: SWEEP_BATCH_SIZE,
            breaker_failure_threshold: 5,
            breaker_reset_seconds: 30,
        }
    }
}

impl ProcessorConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }

    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_seconds.max(1))
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_seconds.max(1))
    }

    pub fn breaker_reset(&self) -> Duration {
        Duration::from_secs(self.breaker_reset_seconds)
    }
}

fn var_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr + ToString,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| key.to_string())
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = ProcessorConfig::default();

        Ok(Config {
            processor: ProcessorConfig {
                sweep_interval_seconds: var_or(
                    "PROCESSOR_SWEEP_INTERVAL_SECONDS",
                    defaults.sweep_interval_seconds,
                )?,
                sweep_batch_size: var_or("PROCESSOR_SWEEP_BATCH_SIZE", defaults.sweep_batch_size)?,
                expiry_interval_seconds: var_or(
                    "PROCESSOR_EXPIRY_INTERVAL_SECONDS",
                    defaults.expiry_interval_seconds,
                )?,
                reconcile_interval_seconds: var_or(
                    "PROCESSOR_RECONCILE_INTERVAL_SECONDS",
                    defaults.reconcile_interval_seconds,
                )?,
                reconcile_batch_size: var_or(
                    "PROCESSOR_RECONCILE_BATCH_SIZE",
                    defaults.reconcile_batch_size,
                )?,
                breaker_failure_threshold: var_or(
                    "PROCESSOR_BREAKER_FAILURE_THRESHOLD",
                    defaults.breaker_failure_threshold,
                )?,
                breaker_reset_seconds: var_or(
                    "PROCESSOR_BREAKER_RESET_SECONDS",
                    defaults.breaker_reset_seconds,
                )?,
            },
            database: DatabaseConfig::from_env()?,
            redis: RedisConfig::from_env(),
            fanout: env::var("FANOUT_MODE")
                .unwrap_or_else(|_| "local".to_string())
                .parse()?,
            ledger: LedgerConfig::from_env()?,
            retry: RetryConfig::from_env()?,
            metrics_port: var_or("PROCESSOR_METRICS_PORT", 9091u16)?,
        })
    }
}
