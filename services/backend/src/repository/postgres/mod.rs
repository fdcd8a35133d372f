//! Postgres implementations of the repository traits
//!
//! Lock order inside every unit that touches money: `provider_accounts`
//! row first, then the `balances` row.

mod cashback;
mod ledger;
mod operations;

pub use cashback::PostgresCashbackRepository;
pub use ledger::PostgresLedgerRepository;
pub use operations::PostgresOperationRepository;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{
    CashbackEarning, CashbackTier, EarningStatus, OperationStatus, ProviderTransaction,
    RetryableOperation, UserLevel,
};
use crate::errors::LedgerError;

pub(crate) const TRANSACTION_COLUMNS: &str = "id, transaction_id, account_id, session_id, round_id, game_id, \
     operation_kind, amount, win_amount, balance_before, balance_after, status, created_at";

pub(crate) const EARNING_COLUMNS: &str = "id, user_id, tier_id, source_transaction_id, expected_ggr, \
     cashback_rate, earned_amount, available_amount, status, expires_at, created_at";

pub(crate) const OPERATION_COLUMNS: &str = "id, operation_type, payload, attempt_count, next_attempt_at, \
     status, last_error, created_at, updated_at";

#[derive(sqlx::FromRow)]
pub(crate) struct TransactionRow {
    id: Uuid,
    transaction_id: String,
    account_id: String,
    session_id: Option<String>,
    round_id: String,
    game_id: Option<String>,
    operation_kind: String,
    amount: Decimal,
    win_amount: Option<Decimal>,
    balance_before: Decimal,
    balance_after: Decimal,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for ProviderTransaction {
    type Error = LedgerError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(ProviderTransaction {
            id: row.id,
            transaction_id: row.transaction_id,
            account_id: row.account_id,
            session_id: row.session_id,
            round_id: row.round_id,
            game_id: row.game_id,
            operation_kind: row.operation_kind.parse()?,
            amount: row.amount,
            win_amount: row.win_amount,
            balance_before: row.balance_before,
            balance_after: row.balance_after,
            status: row.status.parse()?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct TierRow {
    id: Uuid,
    name: String,
    level: i32,
    min_ggr_required: Decimal,
    cashback_percentage: Decimal,
    bonus_multiplier: Decimal,
    daily_limit: Option<Decimal>,
    weekly_limit: Option<Decimal>,
    monthly_limit: Option<Decimal>,
}

impl From<TierRow> for CashbackTier {
    fn from(row: TierRow) -> Self {
        CashbackTier {
            id: row.id,
            name: row.name,
            level: row.level,
            min_ggr_required: row.min_ggr_required,
            cashback_percentage: row.cashback_percentage,
            bonus_multiplier: row.bonus_multiplier,
            daily_limit: row.daily_limit,
            weekly_limit: row.weekly_limit,
            monthly_limit: row.monthly_limit,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct LevelRow {
    user_id: Uuid,
    tier_id: Uuid,
    level: i32,
    total_ggr_accumulated: Decimal,
    last_progressed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl From<LevelRow> for UserLevel {
    fn from(row: LevelRow) -> Self {
        UserLevel {
            user_id: row.user_id,
            tier_id: row.tier_id,
            level: row.level,
            total_ggr_accumulated: row.total_ggr_accumulated,
            last_progressed_at: row.last_progressed_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct EarningRow {
    id: Uuid,
    user_id: Uuid,
    tier_id: Uuid,
    source_transaction_id: String,
    expected_ggr: Decimal,
    cashback_rate: Decimal,
    earned_amount: Decimal,
    available_amount: Decimal,
    status: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<EarningRow> for CashbackEarning {
    type Error = LedgerError;

    fn try_from(row: EarningRow) -> Result<Self, Self::Error> {
        let status: EarningStatus = row.status.parse().map_err(LedgerError::CorruptRecord)?;
        Ok(CashbackEarning {
            id: row.id,
            user_id: row.user_id,
            tier_id: row.tier_id,
            source_transaction_id: row.source_transaction_id,
            expected_ggr: row.expected_ggr,
            cashback_rate: row.cashback_rate,
            earned_amount: row.earned_amount,
            available_amount: row.available_amount,
            status,
            expires_at: row.expires_at,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct OperationRow {
    id: Uuid,
    operation_type: String,
    payload: serde_json::Value,
    attempt_count: i32,
    next_attempt_at: DateTime<Utc>,
    status: String,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OperationRow> for RetryableOperation {
    type Error = LedgerError;

    fn try_from(row: OperationRow) -> Result<Self, Self::Error> {
        let status: OperationStatus = row.status.parse().map_err(LedgerError::CorruptRecord)?;
        Ok(RetryableOperation {
            id: row.id,
            operation_type: row.operation_type,
            payload: row.payload,
            attempt_count: row.attempt_count,
            next_attempt_at: row.next_attempt_at,
            status,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub(crate) fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, LedgerError>
where
    T: TryFrom<R, Error = LedgerError>,
{
    rows.into_iter().map(T::try_from).collect()
}
