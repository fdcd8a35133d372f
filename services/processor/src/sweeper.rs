use async_trait::async_trait;
use backend::errors::LedgerError;
use backend::services::{RetryQueue, SweepReport};
use chrono::Utc;
use std::sync::Arc;

use crate::scheduler::PeriodicJob;

/// Executes due pending operations from the durable retry queue
pub struct RetrySweeper {
    retry: Arc<RetryQueue>,
    batch_size: i64,
}

impl RetrySweeper {
    pub fn new(retry: Arc<RetryQueue>, batch_size: i64) -> Self {
        Self {
            retry,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport, LedgerError> {
        let report = self.retry.run_pending(Utc::now(), self.batch_size).await?;

        metrics::gauge!("retry_sweep_claimed").set(report.claimed as f64);
        if report.dead > 0 || report.failed > 0 {
            tracing::warn!(
                dead = report.dead,
                failed = report.failed,
                "Operations frozen during sweep"
            );
        }

        Ok(report)
    }
}

#[async_trait]
impl PeriodicJob for RetrySweeper {
    fn name(&self) -> &'static str {
        "retry_sweep"
    }

    async fn run_once(&self) -> Result<u64, LedgerError> {
        Ok(self.sweep().await?.claimed as u64)
    }
}
