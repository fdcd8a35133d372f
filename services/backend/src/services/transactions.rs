//! Idempotent transaction processor
//!
//! The synchronous path is the repository's atomic apply, which also writes
//! the round's cashback accrual or void as outbox rows. Those rows are
//! attempted right after the commit and otherwise drained by the sweeper;
//! neither path changes the answer given to the aggregator.

use rust_decimal::Decimal;
use shared::{OperationKind, TransactionStatus};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use super::retry::{EnqueueOutcome, RetryQueue};
use crate::domain::{ApplyOutcome, BatchOutcome, ProviderAccount, ProviderEvent, RetryableOperation, WagerBatch};
use crate::errors::LedgerError;
use crate::fanout::{LedgerEvent, Publisher};
use crate::repository::{LedgerRepository, StoreResult};

/// Committed outcome plus the outbox rows it wrote
#[derive(Debug)]
pub struct Applied {
    pub outcome: ApplyOutcome,
    pub followups: Vec<RetryableOperation>,
}

pub struct TransactionProcessor {
    ledger: Arc<dyn LedgerRepository>,
    retry: Arc<RetryQueue>,
    publisher: Arc<dyn Publisher>,
}

impl TransactionProcessor {
    pub fn new(
        ledger: Arc<dyn LedgerRepository>,
        retry: Arc<RetryQueue>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            ledger,
            retry,
            publisher,
        }
    }

    pub async fn create_account(&self, user_id: Uuid, currency: &str) -> StoreResult<ProviderAccount> {
        let account = self.ledger.create_account(user_id, currency).await?;
        tracing::info!(%user_id, currency, account_id = %account.account_id, "Provider account ready");
        Ok(account)
    }

    pub async fn account(&self, account_id: &str) -> StoreResult<ProviderAccount> {
        self.ledger
            .find_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
    }

    /// Available balance, zero when the user has no balance row yet
    pub async fn balance(&self, user_id: Uuid, currency: &str) -> StoreResult<Decimal> {
        Ok(self
            .ledger
            .balance(user_id, currency)
            .await?
            .map(|b| b.available)
            .unwrap_or(Decimal::ZERO))
    }

    pub async fn apply(&self, event: &ProviderEvent) -> StoreResult<Applied> {
        let span = tracing::info_span!(
            "provider_transaction",
            transaction_id = %event.transaction_id,
            kind = event.kind.as_str(),
            account_id = %event.account_id,
        );

        async move {
            let outcome = match self.ledger.apply(event).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    metrics::counter!(
                        "provider_transactions_total",
                        "kind" => event.kind.as_str(),
                        "outcome" => "rejected"
                    )
                    .increment(1);
                    if e.is_retryable() {
                        tracing::error!(error = %e, "Transaction apply failed");
                    } else {
                        tracing::info!(error = %e, "Transaction rejected");
                    }
                    return Err(e);
                }
            };

            if outcome.is_duplicate() {
                metrics::counter!(
                    "provider_transactions_total",
                    "kind" => event.kind.as_str(),
                    "outcome" => "duplicate"
                )
                .increment(1);
                tracing::info!(balance = %outcome.balance_after(), "Duplicate transaction, returning stored balance");
                return Ok(Applied {
                    outcome,
                    followups: Vec::new(),
                });
            }

            metrics::counter!(
                "provider_transactions_total",
                "kind" => event.kind.as_str(),
                "outcome" => "applied"
            )
            .increment(1);
            tracing::info!(
                amount = %outcome.transaction.amount,
                balance_before = %outcome.transaction.balance_before,
                balance = %outcome.balance_after(),
                "Transaction applied"
            );

            self.publisher.publish(
                outcome.user_id,
                LedgerEvent::BalanceChanged {
                    balance: outcome.balance_after(),
                    currency: outcome.currency.clone(),
                },
            );
            self.notify_win(&outcome);

            let mut outcome = outcome;
            let followups = std::mem::take(&mut outcome.followups);
            Ok(Applied { outcome, followups })
        }
        .instrument(span)
        .await
    }

    /// All-or-nothing debit of several wagers; wagers raise no followups
    pub async fn apply_batch(&self, batch: &WagerBatch) -> StoreResult<BatchOutcome> {
        let span = tracing::info_span!(
            "provider_wager_batch",
            account_id = %batch.account_id,
            bets = batch.bets.len(),
        );

        async move {
            let outcome = match self.ledger.apply_batch(batch).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    metrics::counter!(
                        "provider_transactions_total",
                        "kind" => "wager_batch",
                        "outcome" => "rejected"
                    )
                    .increment(1);
                    if e.is_retryable() {
                        tracing::error!(error = %e, "Batch apply failed");
                    } else {
                        tracing::info!(error = %e, "Batch rejected");
                    }
                    return Err(e);
                }
            };

            let applied = outcome.applied_count();
            let label = if applied == 0 { "duplicate" } else { "applied" };
            metrics::counter!(
                "provider_transactions_total",
                "kind" => "wager_batch",
                "outcome" => label
            )
            .increment(1);
            tracing::info!(
                applied,
                duplicates = outcome.bets.len() - applied,
                balance = %outcome.balance_after,
                "Wager batch applied"
            );

            if applied > 0 {
                self.publisher.publish(
                    outcome.user_id,
                    LedgerEvent::BalanceChanged {
                        balance: outcome.balance_after,
                        currency: outcome.currency.clone(),
                    },
                );
            }
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    /// Inline attempt of each outbox row; whatever does not complete here
    /// is left for the sweeper
    pub async fn dispatch(&self, followups: Vec<RetryableOperation>) {
        for operation in followups {
            match self.retry.attempt(&operation).await {
                Ok(EnqueueOutcome::Completed) => {}
                Ok(EnqueueOutcome::Deferred(id)) | Ok(EnqueueOutcome::Frozen(id)) => {
                    tracing::debug!(operation_id = %id, operation_type = %operation.operation_type, "Followup left for retry");
                }
                Err(e) => {
                    tracing::warn!(
                        operation_id = %operation.id,
                        operation_type = %operation.operation_type,
                        error = %e,
                        "Followup outcome not recorded, sweeper will retry after the lease"
                    );
                }
            }
        }
    }

    fn notify_win(&self, outcome: &ApplyOutcome) {
        let tx = &outcome.transaction;
        match tx.operation_kind {
            OperationKind::Result if tx.amount > Decimal::ZERO => {
                if let Some(wager) = outcome
                    .round_wager
                    .as_ref()
                    .filter(|w| w.status == TransactionStatus::Completed)
                {
                    self.publish_win(outcome, wager.amount, tx.amount);
                }
            }
            OperationKind::WagerAndResult => {
                let win = tx.win_amount.unwrap_or(Decimal::ZERO);
                if win > Decimal::ZERO {
                    self.publish_win(outcome, tx.amount, win);
                }
            }
            OperationKind::Jackpot => self.publish_win(outcome, Decimal::ZERO, tx.amount),
            _ => {}
        }
    }

    fn publish_win(&self, outcome: &ApplyOutcome, bet_amount: Decimal, win_amount: Decimal) {
        self.publisher.publish(
            outcome.user_id,
            LedgerEvent::WinNotification {
                bet_amount,
                win_amount,
                net_winnings: win_amount - bet_amount,
                game: outcome.transaction.game_id.clone(),
            },
        );
    }
}
