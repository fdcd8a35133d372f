//! Posting rules for aggregator events
//!
//! Given the locked balance and the rows already stored under the event's
//! idempotency key, decide whether the event is a replay, a rejection or a
//! new posting. Repositories run this inside their atomic unit and persist
//! the returned plan.

use rust_decimal::Decimal;
use shared::{OperationKind, TransactionStatus};
use std::collections::{HashMap, HashSet};

use crate::domain::{ProviderEvent, ProviderTransaction};
use crate::errors::LedgerError;

/// Rows visible to the decision, all read under the account lock
pub struct PostingContext<'a> {
    pub event: &'a ProviderEvent,
    pub available: Decimal,
    /// Row stored under (transaction_id, kind)
    pub existing: Option<&'a ProviderTransaction>,
    /// Row stored under (transaction_id, kind.reverses())
    pub original: Option<&'a ProviderTransaction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusFlip {
    pub transaction_id: String,
    pub kind: OperationKind,
    pub status: TransactionStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub amount: Decimal,
    pub win_amount: Option<Decimal>,
    pub flips: Vec<StatusFlip>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PostingDecision {
    Duplicate(ProviderTransaction),
    Apply(Posting),
}

pub fn decide(ctx: PostingContext<'_>) -> Result<PostingDecision, LedgerError> {
    let event = ctx.event;

    if let Some(existing) = ctx.existing {
        return match existing.status {
            TransactionStatus::Completed => Ok(PostingDecision::Duplicate(existing.clone())),
            TransactionStatus::RolledBack => Err(LedgerError::OperationNotAllowed(format!(
                "{} {} has been reversed",
                event.kind, event.transaction_id
            ))),
        };
    }

    let before = ctx.available;
    let amount = event.amount.value();

    let posting = match event.kind {
        OperationKind::Wager => Posting {
            balance_before: before,
            balance_after: debit(before, amount)?,
            amount,
            win_amount: None,
            flips: Vec::new(),
        },
        OperationKind::Result | OperationKind::Jackpot => Posting {
            balance_before: before,
            balance_after: before + amount,
            amount,
            win_amount: None,
            flips: Vec::new(),
        },
        OperationKind::WagerAndResult => {
            let win = event
                .win_amount
                .map(|w| w.value())
                .unwrap_or(Decimal::ZERO);
            Posting {
                balance_before: before,
                balance_after: debit(before, amount)? + win,
                amount,
                win_amount: Some(win),
                flips: Vec::new(),
            }
        }
        OperationKind::Rollback => {
            let original = reversible_original(&ctx)?;
            Posting {
                balance_before: before,
                balance_after: before + original.amount,
                amount: original.amount,
                win_amount: None,
                flips: vec![flip(original, TransactionStatus::RolledBack)],
            }
        }
        OperationKind::RollbackOnResult => {
            let original = reversible_original(&ctx)?;
            Posting {
                balance_before: before,
                balance_after: debit(before, original.amount)?,
                amount: original.amount,
                win_amount: None,
                flips: vec![flip(original, TransactionStatus::RolledBack)],
            }
        }
        OperationKind::RollbackOnRollback => {
            let original = reversible_original(&ctx)?;
            Posting {
                balance_before: before,
                balance_after: debit(before, original.amount)?,
                amount: original.amount,
                win_amount: None,
                flips: vec![
                    flip(original, TransactionStatus::RolledBack),
                    StatusFlip {
                        transaction_id: original.transaction_id.clone(),
                        kind: OperationKind::Wager,
                        status: TransactionStatus::Completed,
                    },
                ],
            }
        }
    };

    Ok(PostingDecision::Apply(posting))
}

/// Decide every wager of a batch against one running balance
///
/// All or nothing: a rejected bet, a repeated transaction id or a total
/// above the available balance rejects the whole batch. Bets already stored
/// come back as duplicates and are not debited again.
pub fn decide_batch(
    events: &[ProviderEvent],
    available: Decimal,
    existing: &HashMap<String, ProviderTransaction>,
) -> Result<Vec<PostingDecision>, LedgerError> {
    let mut seen = HashSet::new();
    for event in events {
        if event.kind != OperationKind::Wager {
            return Err(LedgerError::OperationNotAllowed(format!(
                "{} is not a wager",
                event.transaction_id
            )));
        }
        if !seen.insert(event.transaction_id.as_str()) {
            return Err(LedgerError::OperationNotAllowed(format!(
                "{} appears twice in the batch",
                event.transaction_id
            )));
        }
    }

    let required: Decimal = events
        .iter()
        .filter(|e| !existing.contains_key(&e.transaction_id))
        .map(|e| e.amount.value())
        .sum();
    if required > available {
        return Err(LedgerError::InsufficientFunds { required, available });
    }

    let mut running = available;
    events
        .iter()
        .map(|event| {
            let decision = decide(PostingContext {
                event,
                available: running,
                existing: existing.get(&event.transaction_id),
                original: None,
            })?;
            if let PostingDecision::Apply(posting) = &decision {
                running = posting.balance_after;
            }
            Ok(decision)
        })
        .collect()
}

fn debit(available: Decimal, amount: Decimal) -> Result<Decimal, LedgerError> {
    if available < amount {
        return Err(LedgerError::InsufficientFunds {
            required: amount,
            available,
        });
    }
    Ok(available - amount)
}

fn reversible_original<'a>(ctx: &PostingContext<'a>) -> Result<&'a ProviderTransaction, LedgerError> {
    let event = ctx.event;
    let original = ctx
        .original
        .ok_or_else(|| LedgerError::TransactionNotFound(event.transaction_id.clone()))?;

    if original.account_id != event.account_id {
        return Err(LedgerError::OperationNotAllowed(format!(
            "{} belongs to another account",
            event.transaction_id
        )));
    }
    if original.status == TransactionStatus::RolledBack {
        return Err(LedgerError::OperationNotAllowed(format!(
            "{} {} already reversed",
            original.operation_kind, original.transaction_id
        )));
    }
    Ok(original)
}

fn flip(row: &ProviderTransaction, status: TransactionStatus) -> StatusFlip {
    StatusFlip {
        transaction_id: row.transaction_id.clone(),
        kind: row.operation_kind,
        status,
    }
}
