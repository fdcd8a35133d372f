use async_trait::async_trait;
use backend::errors::LedgerError;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerError};

/// One unit of periodic maintenance
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs one pass; the returned count is logged when non-zero
    async fn run_once(&self) -> Result<u64, LedgerError>;
}

/// Drives a job on a fixed interval until cancelled
pub struct Scheduler {
    job: Arc<dyn PeriodicJob>,
    every: Duration,
    circuit_breaker: CircuitBreaker,
}

impl Scheduler {
    pub fn new(job: Arc<dyn PeriodicJob>, every: Duration, circuit_breaker: CircuitBreaker) -> Self {
        Self {
            job,
            every,
            circuit_breaker,
        }
    }

    /// One guarded pass; errors are logged and counted, never propagated
    pub async fn tick(&self) -> Option<u64> {
        let name = self.job.name();
        let job = self.job.clone();

        match self
            .circuit_breaker
            .call(LedgerError::is_retryable, || async move { job.run_once().await })
            .await
        {
            Ok(processed) => {
                if processed > 0 {
                    tracing::info!(job = name, processed, "Job pass completed");
                }
                metrics::counter!("processor_job_runs_total", "job" => name, "outcome" => "ok").increment(1);
                Some(processed)
            }
            Err(CircuitBreakerError::Open) => {
                tracing::warn!(job = name, "Circuit breaker is open, skipping pass");
                metrics::counter!("processor_job_runs_total", "job" => name, "outcome" => "skipped").increment(1);
                None
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(job = name, error = %e, "Job pass failed");
                metrics::counter!("processor_job_runs_total", "job" => name, "outcome" => "error").increment(1);
                None
            }
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let name = self.job.name();
        tracing::info!(job = name, interval_ms = self.every.as_millis() as u64, "Job started");

        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        tracing::info!(job = name, "Job stopped");
    }
}
