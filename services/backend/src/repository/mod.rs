//! Storage seams of the ledger
//!
//! Each trait method that mutates state is one atomic unit. The Postgres
//! implementations use a database transaction with row locks; the
//! in-memory store holds a single lock for the duration of the call.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use shared::OperationKind;
use uuid::Uuid;

use crate::domain::{
    AccrualOutcome, AccrualRequest, ApplyOutcome, BalanceRecord, BatchOutcome, CashbackEarning, CashbackRateOverride, CashbackTier,
    CashbackTotals, ClaimOutcome, DivergentAccount, OperationStatus, ProviderAccount,
    ProviderEvent, ProviderTransaction, ReconcileOutcome, RetryableOperation, UserLevel,
    VoidOutcome, WagerBatch,
};
use crate::errors::LedgerError;

pub use memory::MemoryStore;
pub use postgres::{PostgresCashbackRepository, PostgresLedgerRepository, PostgresOperationRepository};

pub type StoreResult<T> = std::result::Result<T, LedgerError>;

/// Balance store, provider account mirror and provider transaction log
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Idempotent per (user, currency)
    async fn create_account(&self, user_id: Uuid, currency: &str) -> StoreResult<ProviderAccount>;
    async fn find_account(&self, account_id: &str) -> StoreResult<Option<ProviderAccount>>;
    async fn balance(&self, user_id: Uuid, currency: &str) -> StoreResult<Option<BalanceRecord>>;

    /// Dedup, validate and post one event; balance, mirror and log commit together
    async fn apply(&self, event: &ProviderEvent) -> StoreResult<ApplyOutcome>;

    /// Post every wager of the batch in one unit, or none of them
    async fn apply_batch(&self, batch: &WagerBatch) -> StoreResult<BatchOutcome>;

    async fn find_transaction(
        &self,
        transaction_id: &str,
        kind: OperationKind,
    ) -> StoreResult<Option<ProviderTransaction>>;

    async fn find_divergent_accounts(&self, limit: i64) -> StoreResult<Vec<DivergentAccount>>;

    /// Rewrite the mirror from the balance store when they differ
    async fn reconcile(&self, account_id: &str) -> StoreResult<ReconcileOutcome>;
}

/// Tier configuration, user levels, earnings and claims
#[async_trait]
pub trait CashbackRepository: Send + Sync {
    async fn tiers(&self) -> StoreResult<Vec<CashbackTier>>;

    /// Configured edge for (game_type, game_variant); `None` variant is the
    /// operator-level default
    async fn house_edge(&self, game_type: &str, game_variant: Option<&str>) -> StoreResult<Option<Decimal>>;

    /// Initializes the user at the lowest tier on first use
    async fn user_level(&self, user_id: Uuid) -> StoreResult<UserLevel>;

    /// Earning insert, GGR accumulation and tier progression in one unit;
    /// a second accrual for the same source transaction is a duplicate
    async fn accrue(&self, request: &AccrualRequest) -> StoreResult<AccrualOutcome>;

    /// Void the unclaimed remainder of the earning sourced from a reversed wager
    async fn void_earning(&self, user_id: Uuid, source_transaction_id: &str) -> StoreResult<Option<VoidOutcome>>;

    /// Plan, consume, record and credit a claim in one unit
    async fn claim(
        &self,
        user_id: Uuid,
        amount: Decimal,
        currency: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ClaimOutcome>;

    async fn totals(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<CashbackTotals>;
    async fn earnings(&self, user_id: Uuid, limit: i64, offset: i64) -> StoreResult<Vec<CashbackEarning>>;

    /// Flip stale available earnings to expired; returns the number flipped
    async fn expire_earnings(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    /// `None` until an admin first sets it
    async fn rate_override(&self) -> StoreResult<Option<CashbackRateOverride>>;
    async fn set_rate_override(&self, value: &CashbackRateOverride) -> StoreResult<CashbackRateOverride>;
}

/// Durable retry queue
#[async_trait]
pub trait OperationRepository: Send + Sync {
    async fn insert(&self, operation: &RetryableOperation) -> StoreResult<()>;

    /// Lease due pending operations; a leased row is invisible to other
    /// sweepers until `now + lease`
    async fn claim_due(&self, now: DateTime<Utc>, limit: i64, lease: Duration) -> StoreResult<Vec<RetryableOperation>>;

    async fn record_success(&self, id: Uuid, attempt_count: i32) -> StoreResult<()>;

    async fn record_failure(
        &self,
        id: Uuid,
        attempt_count: i32,
        status: OperationStatus,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> StoreResult<()>;

    async fn find(&self, id: Uuid) -> StoreResult<Option<RetryableOperation>>;
    async fn list(&self, status: Option<OperationStatus>, limit: i64) -> StoreResult<Vec<RetryableOperation>>;

    /// Reset a failed or dead operation to pending with a fresh budget
    async fn replay(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<RetryableOperation>>;
}
