//! Ledger services and their wiring

pub mod accrual;
pub mod operations;
pub mod retry;
pub mod transactions;

pub use accrual::{AccrualEngine, AccrualSettings};
pub use operations::LedgerOperations;
pub use retry::{EnqueueOutcome, OperationExecutor, RetryPolicy, RetryQueue, SweepReport};
pub use transactions::{Applied, TransactionProcessor};

use sqlx::PgPool;
use std::sync::Arc;

use crate::fanout::Publisher;
use crate::repository::{
    CashbackRepository, LedgerRepository, MemoryStore, OperationRepository,
    PostgresCashbackRepository, PostgresLedgerRepository, PostgresOperationRepository,
};

#[derive(Clone)]
pub struct Stores {
    pub ledger: Arc<dyn LedgerRepository>,
    pub cashback: Arc<dyn CashbackRepository>,
    pub operations: Arc<dyn OperationRepository>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            ledger: Arc::new(PostgresLedgerRepository::new(pool.clone())),
            cashback: Arc::new(PostgresCashbackRepository::new(pool.clone())),
            operations: Arc::new(PostgresOperationRepository::new(pool)),
        }
    }

    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            ledger: store.clone(),
            cashback: store.clone(),
            operations: store,
        }
    }
}

/// Fully wired processor, accrual engine and retry queue
#[derive(Clone)]
pub struct LedgerServices {
    pub stores: Stores,
    pub processor: Arc<TransactionProcessor>,
    pub accrual: Arc<AccrualEngine>,
    pub retry: Arc<RetryQueue>,
}

impl LedgerServices {
    pub fn build(
        stores: Stores,
        publisher: Arc<dyn Publisher>,
        settings: AccrualSettings,
        policy: RetryPolicy,
    ) -> Self {
        let accrual = Arc::new(AccrualEngine::new(
            stores.cashback.clone(),
            publisher.clone(),
            settings,
        ));
        let executor = Arc::new(LedgerOperations::new(
            stores.ledger.clone(),
            accrual.clone(),
            publisher.clone(),
        ));
        let retry = Arc::new(RetryQueue::new(stores.operations.clone(), executor, policy));
        let processor = Arc::new(TransactionProcessor::new(
            stores.ledger.clone(),
            retry.clone(),
            publisher,
        ));

        Self {
            stores,
            processor,
            accrual,
            retry,
        }
    }
}
