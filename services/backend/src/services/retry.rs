//! Durable retry queue for post-commit side effects
//!
//! Every operation is attempted once inline. Follow-ups of a posting are
//! already stored as outbox rows by the apply unit; other operations are
//! persisted when the inline attempt fails. The sweeper picks pending rows
//! up once `next_attempt_at` has passed. Permanent failures freeze as
//! `failed`, exhausted budgets freeze as `dead`; both stay replayable.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use shared::{
    MAX_OPERATION_ATTEMPTS, OPERATION_LEASE_MS, RETRY_BACKOFF_BASE_MS, RETRY_BACKOFF_MAX_MS,
    RETRY_JITTER_RATIO,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{OperationPayload, OperationStatus, RetryableOperation};
use crate::errors::LedgerError;
use crate::repository::{OperationRepository, StoreResult};

/// Runs one decoded operation; must be idempotent
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(&self, payload: &OperationPayload) -> Result<(), LedgerError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub backoff_base_ms: i64,
    pub backoff_max_ms: i64,
    pub jitter_ratio: f64,
    pub lease_ms: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_OPERATION_ATTEMPTS,
            backoff_base_ms: RETRY_BACKOFF_BASE_MS,
            backoff_max_ms: RETRY_BACKOFF_MAX_MS,
            jitter_ratio: RETRY_JITTER_RATIO,
            lease_ms: OPERATION_LEASE_MS,
        }
    }
}

impl RetryPolicy {
    /// base * 2^(n-1), capped at max; `attempt` is 1-indexed
    pub fn compute_backoff_ms(&self, attempt: i32) -> i64 {
        let n = attempt.max(1) as u32;
        let factor = 2_i64.saturating_pow(n.saturating_sub(1));
        self.backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms)
    }

    /// Backoff with symmetric jitter of `jitter_ratio`
    pub fn backoff(&self, attempt: i32) -> Duration {
        let delay = self.compute_backoff_ms(attempt);
        let spread = (delay as f64 * self.jitter_ratio) as i64;
        let jitter = if spread > 0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0
        };
        Duration::milliseconds((delay + jitter).max(0))
    }

    pub fn lease(&self) -> Duration {
        Duration::milliseconds(self.lease_ms)
    }

    /// State after `attempt` failed with `error`
    fn after_failure(&self, attempt: i32, error: &LedgerError, now: DateTime<Utc>) -> (OperationStatus, DateTime<Utc>) {
        if !error.is_retryable() {
            (OperationStatus::Failed, now)
        } else if attempt >= self.max_attempts {
            (OperationStatus::Dead, now)
        } else {
            (OperationStatus::Pending, now + self.backoff(attempt))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Succeeded on the inline attempt; nothing persisted
    Completed,
    /// Persisted as pending for the sweeper
    Deferred(Uuid),
    /// Persisted as failed or dead
    Frozen(Uuid),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub claimed: usize,
    pub succeeded: usize,
    pub rescheduled: usize,
    pub dead: usize,
    pub failed: usize,
}

pub struct RetryQueue {
    operations: Arc<dyn OperationRepository>,
    executor: Arc<dyn OperationExecutor>,
    policy: RetryPolicy,
}

impl RetryQueue {
    pub fn new(
        operations: Arc<dyn OperationRepository>,
        executor: Arc<dyn OperationExecutor>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            operations,
            executor,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Attempt now; on failure persist with attempt_count 1
    pub async fn enqueue(&self, payload: OperationPayload) -> StoreResult<EnqueueOutcome> {
        let operation_type = payload.operation_type();
        let error = match self.executor.execute(&payload).await {
            Ok(()) => {
                metrics::counter!("retry_operations_total", "outcome" => "inline").increment(1);
                return Ok(EnqueueOutcome::Completed);
            }
            Err(e) => e,
        };

        let now = Utc::now();
        let (status, next_attempt_at) = self.policy.after_failure(1, &error, now);
        let operation = RetryableOperation {
            id: Uuid::new_v4(),
            operation_type: operation_type.to_string(),
            payload: serde_json::to_value(&payload)?,
            attempt_count: 1,
            next_attempt_at,
            status,
            last_error: Some(error.to_string()),
            created_at: now,
            updated_at: now,
        };
        self.operations.insert(&operation).await?;
        metrics::counter!("retry_operations_total", "outcome" => status.as_str()).increment(1);

        tracing::warn!(
            operation_id = %operation.id,
            operation_type,
            attempt_count = 1,
            status = status.as_str(),
            error = %error,
            "Operation deferred to retry queue"
        );

        Ok(match status {
            OperationStatus::Pending => EnqueueOutcome::Deferred(operation.id),
            _ => EnqueueOutcome::Frozen(operation.id),
        })
    }

    /// Inline attempt of an outbox row written by the apply unit
    ///
    /// When the outcome cannot be recorded the row stays pending and the
    /// sweeper retries it after its lease.
    pub async fn attempt(&self, operation: &RetryableOperation) -> StoreResult<EnqueueOutcome> {
        let result = match operation.decode() {
            Ok(payload) => self.executor.execute(&payload).await,
            Err(e) => Err(LedgerError::from(e)),
        };

        let error = match result {
            Ok(()) => {
                metrics::counter!("retry_operations_total", "outcome" => "inline").increment(1);
                self.operations.record_success(operation.id, 1).await?;
                return Ok(EnqueueOutcome::Completed);
            }
            Err(e) => e,
        };

        let (status, next_attempt_at) = self.policy.after_failure(1, &error, Utc::now());
        self.operations
            .record_failure(operation.id, 1, status, next_attempt_at, &error.to_string())
            .await?;
        metrics::counter!("retry_operations_total", "outcome" => status.as_str()).increment(1);

        tracing::warn!(
            operation_id = %operation.id,
            operation_type = %operation.operation_type,
            attempt_count = 1,
            status = status.as_str(),
            error = %error,
            "Operation deferred to retry queue"
        );

        Ok(match status {
            OperationStatus::Pending => EnqueueOutcome::Deferred(operation.id),
            _ => EnqueueOutcome::Frozen(operation.id),
        })
    }

    /// Lease and execute every due pending operation
    pub async fn run_pending(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<SweepReport> {
        let due = self
            .operations
            .claim_due(now, limit, self.policy.lease())
            .await?;
        let mut report = SweepReport {
            claimed: due.len(),
            ..SweepReport::default()
        };

        for operation in due {
            let attempt = operation.attempt_count + 1;
            let result = match operation.decode() {
                Ok(payload) => self.executor.execute(&payload).await,
                Err(e) => Err(LedgerError::from(e)),
            };

            let recorded = match result {
                Ok(()) => {
                    report.succeeded += 1;
                    metrics::counter!("retry_operations_total", "outcome" => "succeeded").increment(1);
                    tracing::info!(
                        operation_id = %operation.id,
                        operation_type = %operation.operation_type,
                        attempt_count = attempt,
                        "Operation succeeded"
                    );
                    self.operations.record_success(operation.id, attempt).await
                }
                Err(error) => {
                    let (status, next_attempt_at) = self.policy.after_failure(attempt, &error, now);
                    match status {
                        OperationStatus::Pending => report.rescheduled += 1,
                        OperationStatus::Dead => report.dead += 1,
                        _ => report.failed += 1,
                    }
                    metrics::counter!("retry_operations_total", "outcome" => status.as_str()).increment(1);

                    if status == OperationStatus::Pending {
                        tracing::warn!(
                            operation_id = %operation.id,
                            operation_type = %operation.operation_type,
                            attempt_count = attempt,
                            next_attempt_at = %next_attempt_at,
                            error = %error,
                            "Operation failed, rescheduled"
                        );
                    } else {
                        tracing::error!(
                            operation_id = %operation.id,
                            operation_type = %operation.operation_type,
                            attempt_count = attempt,
                            status = status.as_str(),
                            error = %error,
                            "Operation frozen"
                        );
                    }

                    self.operations
                        .record_failure(operation.id, attempt, status, next_attempt_at, &error.to_string())
                        .await
                }
            };

            // the lease expires and the row is picked up again
            if let Err(e) = recorded {
                tracing::error!(operation_id = %operation.id, error = %e, "Failed to record operation state");
            }
        }

        Ok(report)
    }

    pub async fn replay(&self, id: Uuid) -> StoreResult<Option<RetryableOperation>> {
        let replayed = self.operations.replay(id, Utc::now()).await?;
        if let Some(operation) = &replayed {
            tracing::info!(
                operation_id = %operation.id,
                operation_type = %operation.operation_type,
                "Operation replayed"
            );
        }
        Ok(replayed)
    }

    pub async fn list(&self, status: Option<OperationStatus>, limit: i64) -> StoreResult<Vec<RetryableOperation>> {
        self.operations.list(status, limit).await
    }

    pub async fn find(&self, id: Uuid) -> StoreResult<Option<RetryableOperation>> {
        self.operations.find(id).await
    }
}
