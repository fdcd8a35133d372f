use async_trait::async_trait;
use backend::domain::OperationPayload;
use backend::errors::LedgerError;
use backend::repository::LedgerRepository;
use backend::services::{EnqueueOutcome, RetryQueue};
use std::sync::Arc;

use crate::scheduler::PeriodicJob;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub divergent: usize,
    pub corrected: usize,
    pub deferred: usize,
}

/// Finds mirror rows that drifted from the balance store and rewrites them
///
/// Each correction goes through the retry queue so a failure leaves a
/// replayable operation behind instead of a log line.
pub struct Reconciler {
    ledger: Arc<dyn LedgerRepository>,
    retry: Arc<RetryQueue>,
    batch_size: i64,
}

impl Reconciler {
    pub fn new(ledger: Arc<dyn LedgerRepository>, retry: Arc<RetryQueue>, batch_size: i64) -> Self {
        Self {
            ledger,
            retry,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn reconcile(&self) -> Result<ReconcileReport, LedgerError> {
        let divergent = self.ledger.find_divergent_accounts(self.batch_size).await?;
        let mut report = ReconcileReport {
            divergent: divergent.len(),
            ..ReconcileReport::default()
        };

        for account in divergent {
            tracing::warn!(
                account_id = %account.account_id,
                user_id = %account.user_id,
                currency = %account.currency,
                mirror_balance = %account.mirror_balance,
                balance = %account.balance,
                "Mirror diverged from balance store"
            );

            let outcome = self
                .retry
                .enqueue(OperationPayload::ReconcileBalance {
                    account_id: account.account_id.clone(),
                })
                .await?;
            match outcome {
                EnqueueOutcome::Completed => report.corrected += 1,
                EnqueueOutcome::Deferred(_) | EnqueueOutcome::Frozen(_) => report.deferred += 1,
            }
        }

        metrics::counter!("ledger_mirror_divergence_total").increment(report.divergent as u64);
        Ok(report)
    }
}

#[async_trait]
impl PeriodicJob for Reconciler {
    fn name(&self) -> &'static str {
        "mirror_reconcile"
    }

    async fn run_once(&self) -> Result<u64, LedgerError> {
        Ok(self.reconcile().await?.divergent as u64)
    }
}
