//! Deferred work raised by a committed posting
//!
//! Planned inside the apply unit so the outbox rows commit together with
//! the posting they belong to.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use shared::{OperationKind, TransactionStatus};
use uuid::Uuid;

use crate::domain::{OperationPayload, ProviderTransaction, Settlement};

/// Accruals and voids owed for a freshly stored row
pub fn plan(
    transaction: &ProviderTransaction,
    round_wager: Option<&ProviderTransaction>,
    user_id: Uuid,
    currency: &str,
    now: DateTime<Utc>,
) -> Vec<OperationPayload> {
    let settlement = |source: &ProviderTransaction, bet: Decimal, win: Decimal| {
        (win < bet).then(|| {
            OperationPayload::AccrueCashback(Settlement {
                user_id,
                account_id: transaction.account_id.clone(),
                source_transaction_id: source.transaction_id.clone(),
                settling_transaction_id: transaction.transaction_id.clone(),
                round_id: transaction.round_id.clone(),
                game_id: transaction.game_id.clone(),
                bet_amount: bet,
                win_amount: win,
                currency: currency.to_string(),
                settled_at: now,
            })
        })
    };

    let payload = match transaction.operation_kind {
        OperationKind::Result => match round_wager {
            Some(wager) if wager.status == TransactionStatus::Completed => {
                settlement(wager, wager.amount, transaction.amount)
            }
            Some(_) => {
                tracing::info!(round_id = %transaction.round_id, "Round wager reversed, no settlement");
                None
            }
            None => {
                tracing::warn!(round_id = %transaction.round_id, "Result without a wager in the round");
                None
            }
        },
        OperationKind::WagerAndResult => settlement(
            transaction,
            transaction.amount,
            transaction.win_amount.unwrap_or(Decimal::ZERO),
        ),
        OperationKind::Rollback => Some(OperationPayload::VoidCashback {
            user_id,
            source_transaction_id: transaction.transaction_id.clone(),
        }),
        OperationKind::RollbackOnResult => round_wager.map(|wager| OperationPayload::VoidCashback {
            user_id,
            source_transaction_id: wager.transaction_id.clone(),
        }),
        OperationKind::Wager | OperationKind::RollbackOnRollback | OperationKind::Jackpot => None,
    };

    payload.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row(tx: &str, kind: OperationKind, amount: Decimal, status: TransactionStatus) -> ProviderTransaction {
        ProviderTransaction {
            id: Uuid::new_v4(),
            transaction_id: tx.to_string(),
            account_id: "acc-1".to_string(),
            session_id: None,
            round_id: "r-1".to_string(),
            game_id: Some("slot-1".to_string()),
            operation_kind: kind,
            amount,
            win_amount: None,
            balance_before: Decimal::ZERO,
            balance_after: Decimal::ZERO,
            status,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_losing_result_settles_against_round_wager() {
        let wager = row("w-1", OperationKind::Wager, dec!(100), TransactionStatus::Completed);
        let result = row("res-1", OperationKind::Result, dec!(20), TransactionStatus::Completed);

        let planned = plan(&result, Some(&wager), Uuid::nil(), "USD", Utc::now());
        let [OperationPayload::AccrueCashback(settlement)] = planned.as_slice() else {
            panic!("expected one accrual, got {:?}", planned);
        };
        assert_eq!(settlement.source_transaction_id, "w-1");
        assert_eq!(settlement.settling_transaction_id, "res-1");
        assert_eq!(settlement.bet_amount, dec!(100));
        assert_eq!(settlement.win_amount, dec!(20));
    }

    #[test]
    fn test_winning_or_orphan_results_plan_nothing() {
        let wager = row("w-1", OperationKind::Wager, dec!(100), TransactionStatus::Completed);
        let win = row("res-1", OperationKind::Result, dec!(150), TransactionStatus::Completed);
        assert!(plan(&win, Some(&wager), Uuid::nil(), "USD", Utc::now()).is_empty());

        let loss = row("res-2", OperationKind::Result, dec!(0), TransactionStatus::Completed);
        assert!(plan(&loss, None, Uuid::nil(), "USD", Utc::now()).is_empty());

        let reversed = row("w-1", OperationKind::Wager, dec!(100), TransactionStatus::RolledBack);
        assert!(plan(&loss, Some(&reversed), Uuid::nil(), "USD", Utc::now()).is_empty());
    }

    #[test]
    fn test_combined_round_is_its_own_source() {
        let mut combined = row("wr-1", OperationKind::WagerAndResult, dec!(50), TransactionStatus::Completed);
        combined.win_amount = Some(dec!(10));

        let planned = plan(&combined, None, Uuid::nil(), "USD", Utc::now());
        let [OperationPayload::AccrueCashback(settlement)] = planned.as_slice() else {
            panic!("expected one accrual, got {:?}", planned);
        };
        assert_eq!(settlement.source_transaction_id, "wr-1");
        assert_eq!(settlement.settling_transaction_id, "wr-1");
        assert_eq!(settlement.win_amount, dec!(10));
    }

    #[test]
    fn test_reversals_void_the_round_wager_earning() {
        let wager = row("w-1", OperationKind::Wager, dec!(100), TransactionStatus::RolledBack);
        let rollback = row("w-1", OperationKind::Rollback, dec!(100), TransactionStatus::Completed);
        assert_eq!(
            plan(&rollback, None, Uuid::nil(), "USD", Utc::now()),
            vec![OperationPayload::VoidCashback {
                user_id: Uuid::nil(),
                source_transaction_id: "w-1".to_string(),
            }]
        );

        let on_result = row("res-1", OperationKind::RollbackOnResult, dec!(0), TransactionStatus::Completed);
        assert_eq!(
            plan(&on_result, Some(&wager), Uuid::nil(), "USD", Utc::now()),
            vec![OperationPayload::VoidCashback {
                user_id: Uuid::nil(),
                source_transaction_id: "w-1".to_string(),
            }]
        );

        let jackpot = row("j-1", OperationKind::Jackpot, dec!(500), TransactionStatus::Completed);
        assert!(plan(&jackpot, None, Uuid::nil(), "USD", Utc::now()).is_empty());
    }
}
