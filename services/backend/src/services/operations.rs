use async_trait::async_trait;
use std::sync::Arc;

use super::accrual::AccrualEngine;
use super::retry::OperationExecutor;
use crate::domain::OperationPayload;
use crate::errors::LedgerError;
use crate::fanout::{LedgerEvent, Publisher};
use crate::repository::LedgerRepository;

/// Executes the side effects routed through the retry queue
pub struct LedgerOperations {
    ledger: Arc<dyn LedgerRepository>,
    accrual: Arc<AccrualEngine>,
    publisher: Arc<dyn Publisher>,
}

impl LedgerOperations {
    pub fn new(
        ledger: Arc<dyn LedgerRepository>,
        accrual: Arc<AccrualEngine>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            ledger,
            accrual,
            publisher,
        }
    }
}

#[async_trait]
impl OperationExecutor for LedgerOperations {
    async fn execute(&self, payload: &OperationPayload) -> Result<(), LedgerError> {
        match payload {
            OperationPayload::AccrueCashback(settlement) => {
                self.accrual.on_settlement(settlement).await?;
            }
            OperationPayload::VoidCashback {
                user_id,
                source_transaction_id,
            } => {
                self.accrual.void(*user_id, source_transaction_id).await?;
            }
            OperationPayload::ReconcileBalance { account_id } => {
                let outcome = self.ledger.reconcile(account_id).await?;
                if outcome.corrected {
                    metrics::counter!("balance_reconciliations_total").increment(1);
                    tracing::warn!(
                        account_id = %outcome.account_id,
                        user_id = %outcome.user_id,
                        mirror_before = %outcome.mirror_before,
                        balance = %outcome.balance,
                        "Provider mirror diverged, rewritten from balance store"
                    );
                    self.publisher.publish(
                        outcome.user_id,
                        LedgerEvent::BalanceChanged {
                            balance: outcome.balance,
                            currency: outcome.currency,
                        },
                    );
                }
            }
        }
        Ok(())
    }
}
