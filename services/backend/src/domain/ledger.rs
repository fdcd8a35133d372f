use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{Amount, OperationKind, TransactionStatus};
use uuid::Uuid;

use super::RetryableOperation;

/// (user, currency) -> available / reserved
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct BalanceRecord {
    pub user_id: Uuid,
    pub currency: String,
    pub available: Decimal,
    pub reserved: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Aggregator-facing mirror of a balance row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct ProviderAccount {
    pub account_id: String,
    pub user_id: Uuid,
    pub currency: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderTransaction {
    pub id: Uuid,
    pub transaction_id: String,
    pub account_id: String,
    pub session_id: Option<String>,
    pub round_id: String,
    pub game_id: Option<String>,
    pub operation_kind: OperationKind,
    /// Bet for wagers, win for results, reversed amount for rollbacks
    pub amount: Decimal,
    /// Win part of a combined wager_and_result
    pub win_amount: Option<Decimal>,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

/// Inbound aggregator event
///
/// Rollback kinds carry the transaction id of the operation they reverse;
/// their `amount` is informational, the reversed amount is read from the
/// original row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub transaction_id: String,
    pub kind: OperationKind,
    pub account_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub round_id: String,
    #[serde(default)]
    pub game_id: Option<String>,
    pub amount: Amount,
    #[serde(default)]
    pub win_amount: Option<Amount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    Applied,
    Duplicate,
}

/// Result of the atomic apply step
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub status: ApplyStatus,
    /// The stored row (the earlier one on duplicates)
    pub transaction: ProviderTransaction,
    pub user_id: Uuid,
    pub currency: String,
    /// Wager of the same round, read inside the apply unit for settling
    /// kinds and result reversals
    pub round_wager: Option<ProviderTransaction>,
    /// Outbox rows committed with the posting; empty on duplicates
    pub followups: Vec<RetryableOperation>,
}

impl ApplyOutcome {
    pub fn balance_after(&self) -> Decimal {
        self.transaction.balance_after
    }

    pub fn is_duplicate(&self) -> bool {
        self.status == ApplyStatus::Duplicate
    }
}

/// One bet of a batch wager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchBet {
    pub transaction_id: String,
    pub round_id: String,
    pub amount: Amount,
}

/// Several wagers on one account, debited together or not at all
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerBatch {
    pub account_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub game_id: Option<String>,
    pub bets: Vec<BatchBet>,
}

impl WagerBatch {
    /// The batch as individual wager events, in submission order
    pub fn events(&self) -> Vec<ProviderEvent> {
        self.bets
            .iter()
            .map(|bet| ProviderEvent {
                transaction_id: bet.transaction_id.clone(),
                kind: OperationKind::Wager,
                account_id: self.account_id.clone(),
                session_id: self.session_id.clone(),
                round_id: bet.round_id.clone(),
                game_id: self.game_id.clone(),
                amount: bet.amount,
                win_amount: None,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct BatchBetOutcome {
    pub status: ApplyStatus,
    /// The stored row (the earlier one on duplicates)
    pub transaction: ProviderTransaction,
}

/// Result of the atomic batch apply
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub user_id: Uuid,
    pub currency: String,
    /// Available balance after the whole batch
    pub balance_after: Decimal,
    pub bets: Vec<BatchBetOutcome>,
}

impl BatchOutcome {
    pub fn applied_count(&self) -> usize {
        self.bets
            .iter()
            .filter(|b| b.status == ApplyStatus::Applied)
            .count()
    }
}

/// A closed round with a net loss, input to cashback accrual
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settlement {
    pub user_id: Uuid,
    pub account_id: String,
    /// Transaction id of the wager that opened the round
    pub source_transaction_id: String,
    /// The result or wager_and_result that closed the round
    pub settling_transaction_id: String,
    pub round_id: String,
    pub game_id: Option<String>,
    pub bet_amount: Decimal,
    pub win_amount: Decimal,
    pub currency: String,
    pub settled_at: DateTime<Utc>,
}

/// Mirror row whose balance differs from the balance store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct DivergentAccount {
    pub account_id: String,
    pub user_id: Uuid,
    pub currency: String,
    pub mirror_balance: Decimal,
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconcileOutcome {
    pub account_id: String,
    pub user_id: Uuid,
    pub currency: String,
    pub balance: Decimal,
    pub mirror_before: Decimal,
    pub corrected: bool,
}
