//! In-memory implementation of every repository trait
//!
//! One mutex guards all tables, so each trait call is serializable with
//! respect to every other. Used by the test-suite and local runs without
//! Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use shared::{OperationKind, TransactionStatus};
use std::collections::HashMap;
use uuid::Uuid;

use super::{CashbackRepository, LedgerRepository, OperationRepository, StoreResult};
use crate::domain::{
    AccrualDisposition, AccrualOutcome, AccrualRequest, ApplyOutcome, ApplyStatus, BalanceRecord, BatchBetOutcome,
    BatchOutcome,
    CashbackClaim, CashbackEarning, CashbackRateOverride, CashbackTier, CashbackTotals, ClaimOutcome, ClaimedTotals,
    DivergentAccount, EarningStatus, OperationStatus, ProviderAccount, ProviderEvent,
    ProviderTransaction, ReconcileOutcome, RetryableOperation, UserLevel, VoidOutcome, WagerBatch,
};
use crate::errors::LedgerError;
use crate::ledger::claim::{plan_claim, ClaimWindows};
use crate::ledger::followups::plan as plan_followups;
use crate::ledger::posting::{decide, decide_batch, PostingContext, PostingDecision};
use crate::ledger::tiers::{earned_cashback, lowest_tier, promotions};

#[derive(Default)]
struct Tables {
    balances: HashMap<(Uuid, String), BalanceRecord>,
    accounts: HashMap<String, ProviderAccount>,
    transactions: HashMap<(String, OperationKind), ProviderTransaction>,
    tiers: Vec<CashbackTier>,
    house_edges: HashMap<(String, Option<String>), Decimal>,
    levels: HashMap<Uuid, UserLevel>,
    earnings: Vec<CashbackEarning>,
    claims: Vec<CashbackClaim>,
    rate_override: Option<CashbackRateOverride>,
    operations: HashMap<Uuid, RetryableOperation>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

/// Bronze to Diamond ladder used when no tiers are configured explicitly
pub fn default_tiers() -> Vec<CashbackTier> {
    // (name, level, min GGR, cashback % x10, bonus multiplier x100, daily limit)
    [
        ("Bronze", 1, 0, 5, 100, 50),
        ("Silver", 2, 1_000, 10, 110, 100),
        ("Gold", 3, 5_000, 15, 125, 250),
        ("Platinum", 4, 15_000, 20, 150, 500),
        ("Diamond", 5, 50_000, 25, 200, 1_000),
    ]
    .into_iter()
    .map(|(name, level, min, pct, bonus, daily): (&str, i32, i64, i64, i64, i64)| CashbackTier {
        id: Uuid::new_v4(),
        name: name.to_string(),
        level,
        min_ggr_required: Decimal::from(min),
        cashback_percentage: Decimal::new(pct, 1),
        bonus_multiplier: Decimal::new(bonus, 2),
        daily_limit: Some(Decimal::from(daily)),
        weekly_limit: None,
        monthly_limit: None,
    })
    .collect()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_tiers() -> Self {
        let store = Self::new();
        store.set_tiers(default_tiers());
        store
    }

    pub fn set_tiers(&self, tiers: Vec<CashbackTier>) {
        self.tables.lock().tiers = tiers;
    }

    pub fn set_house_edge(&self, game_type: &str, game_variant: Option<&str>, edge: Decimal) {
        self.tables
            .lock()
            .house_edges
            .insert((game_type.to_string(), game_variant.map(str::to_string)), edge);
    }

    /// Fund a user outside the aggregator flow; updates balance and mirror
    pub fn deposit(&self, user_id: Uuid, currency: &str, amount: Decimal) -> Decimal {
        let mut t = self.tables.lock();
        credit_user(&mut t, user_id, currency, amount, Utc::now())
    }

    /// Overwrite only the mirror, leaving the balance store untouched
    pub fn set_mirror_balance(&self, account_id: &str, balance: Decimal) {
        if let Some(account) = self.tables.lock().accounts.get_mut(account_id) {
            account.balance = balance;
        }
    }

    pub fn transaction_count(&self) -> usize {
        self.tables.lock().transactions.len()
    }
}

fn credit_user(t: &mut Tables, user_id: Uuid, currency: &str, amount: Decimal, now: DateTime<Utc>) -> Decimal {
    let balance = t
        .balances
        .entry((user_id, currency.to_string()))
        .or_insert_with(|| empty_balance(user_id, currency, now));
    balance.available += amount;
    balance.updated_at = now;
    let available = balance.available;

    for account in t
        .accounts
        .values_mut()
        .filter(|a| a.user_id == user_id && a.currency == currency)
    {
        account.balance = available;
        account.updated_at = now;
    }
    available
}

fn empty_balance(user_id: Uuid, currency: &str, now: DateTime<Utc>) -> BalanceRecord {
    BalanceRecord {
        user_id,
        currency: currency.to_string(),
        available: Decimal::ZERO,
        reserved: Decimal::ZERO,
        updated_at: now,
    }
}

fn round_wager(t: &Tables, account_id: &str, round_id: &str) -> Option<ProviderTransaction> {
    t.transactions
        .values()
        .filter(|tx| {
            tx.operation_kind == OperationKind::Wager
                && tx.account_id == account_id
                && tx.round_id == round_id
        })
        .max_by_key(|tx| tx.created_at)
        .cloned()
}

fn ensure_level(t: &mut Tables, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<UserLevel> {
    if let Some(level) = t.levels.get(&user_id) {
        return Ok(level.clone());
    }
    let lowest = lowest_tier(&t.tiers)
        .ok_or_else(|| LedgerError::CorruptRecord("no cashback tiers configured".into()))?;
    let level = UserLevel {
        user_id,
        tier_id: lowest.id,
        level: lowest.level,
        total_ggr_accumulated: Decimal::ZERO,
        last_progressed_at: None,
        updated_at: now,
    };
    t.levels.insert(user_id, level.clone());
    Ok(level)
}

fn tier_by_id(t: &Tables, tier_id: Uuid) -> StoreResult<CashbackTier> {
    t.tiers
        .iter()
        .find(|tier| tier.id == tier_id)
        .cloned()
        .ok_or_else(|| LedgerError::CorruptRecord(format!("tier {} not configured", tier_id)))
}

#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn create_account(&self, user_id: Uuid, currency: &str) -> StoreResult<ProviderAccount> {
        let mut t = self.tables.lock();
        if let Some(existing) = t
            .accounts
            .values()
            .find(|a| a.user_id == user_id && a.currency == currency)
        {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let balance = t
            .balances
            .entry((user_id, currency.to_string()))
            .or_insert_with(|| empty_balance(user_id, currency, now))
            .available;
        let account = ProviderAccount {
            account_id: Uuid::new_v4().to_string(),
            user_id,
            currency: currency.to_string(),
            balance,
            created_at: now,
            updated_at: now,
        };
        t.accounts.insert(account.account_id.clone(), account.clone());
        Ok(account)
    }

    async fn find_account(&self, account_id: &str) -> StoreResult<Option<ProviderAccount>> {
        Ok(self.tables.lock().accounts.get(account_id).cloned())
    }

    async fn balance(&self, user_id: Uuid, currency: &str) -> StoreResult<Option<BalanceRecord>> {
        Ok(self
            .tables
            .lock()
            .balances
            .get(&(user_id, currency.to_string()))
            .cloned())
    }

    async fn apply(&self, event: &ProviderEvent) -> StoreResult<ApplyOutcome> {
        let mut t = self.tables.lock();
        let account = t
            .accounts
            .get(&event.account_id)
            .cloned()
            .ok_or_else(|| LedgerError::AccountNotFound(event.account_id.clone()))?;
        let key = (account.user_id, account.currency.clone());
        let available = t
            .balances
            .get(&key)
            .map(|b| b.available)
            .unwrap_or(Decimal::ZERO);

        let existing = t
            .transactions
            .get(&(event.transaction_id.clone(), event.kind))
            .cloned();
        let original = event
            .kind
            .reverses()
            .and_then(|kind| t.transactions.get(&(event.transaction_id.clone(), kind)).cloned());

        let posting = match decide(PostingContext {
            event,
            available,
            existing: existing.as_ref(),
            original: original.as_ref(),
        })? {
            PostingDecision::Duplicate(row) => {
                return Ok(ApplyOutcome {
                    status: ApplyStatus::Duplicate,
                    transaction: row,
                    user_id: account.user_id,
                    currency: account.currency,
                    round_wager: None,
                    followups: Vec::new(),
                });
            }
            PostingDecision::Apply(posting) => posting,
        };

        let now = Utc::now();
        let row = ProviderTransaction {
            id: Uuid::new_v4(),
            transaction_id: event.transaction_id.clone(),
            account_id: event.account_id.clone(),
            session_id: event.session_id.clone(),
            round_id: event.round_id.clone(),
            game_id: event.game_id.clone(),
            operation_kind: event.kind,
            amount: posting.amount,
            win_amount: posting.win_amount,
            balance_before: posting.balance_before,
            balance_after: posting.balance_after,
            status: TransactionStatus::Completed,
            created_at: now,
        };

        // Neither kind flips a wager row, so reading before the writes is safe
        let round_wager = match event.kind {
            OperationKind::Result => round_wager(&t, &event.account_id, &event.round_id),
            OperationKind::RollbackOnResult => original
                .as_ref()
                .and_then(|result| round_wager(&t, &event.account_id, &result.round_id)),
            _ => None,
        };
        let followups = plan_followups(&row, round_wager.as_ref(), account.user_id, &account.currency, now)
            .iter()
            .map(|payload| RetryableOperation::queued(payload, now))
            .collect::<serde_json::Result<Vec<_>>>()?;

        let balance = t
            .balances
            .entry(key)
            .or_insert_with(|| empty_balance(account.user_id, &account.currency, now));
        balance.available = posting.balance_after;
        balance.updated_at = now;

        if let Some(mirror) = t.accounts.get_mut(&event.account_id) {
            mirror.balance = posting.balance_after;
            mirror.updated_at = now;
        }

        for flip in &posting.flips {
            if let Some(target) = t
                .transactions
                .get_mut(&(flip.transaction_id.clone(), flip.kind))
            {
                target.status = flip.status;
            }
        }
        t.transactions
            .insert((row.transaction_id.clone(), row.operation_kind), row.clone());
        for operation in &followups {
            t.operations.insert(operation.id, operation.clone());
        }

        Ok(ApplyOutcome {
            status: ApplyStatus::Applied,
            transaction: row,
            user_id: account.user_id,
            currency: account.currency,
            round_wager,
            followups,
        })
    }

    async fn apply_batch(&self, batch: &WagerBatch) -> StoreResult<BatchOutcome> {
        let mut t = self.tables.lock();
        let account = t
            .accounts
            .get(&batch.account_id)
            .cloned()
            .ok_or_else(|| LedgerError::AccountNotFound(batch.account_id.clone()))?;
        let key = (account.user_id, account.currency.clone());
        let available = t
            .balances
            .get(&key)
            .map(|b| b.available)
            .unwrap_or(Decimal::ZERO);

        let events = batch.events();
        let existing: HashMap<String, ProviderTransaction> = events
            .iter()
            .filter_map(|e| {
                t.transactions
                    .get(&(e.transaction_id.clone(), OperationKind::Wager))
                    .map(|row| (e.transaction_id.clone(), row.clone()))
            })
            .collect();
        let decisions = decide_batch(&events, available, &existing)?;

        let now = Utc::now();
        let mut balance_after = available;
        let mut bets = Vec::with_capacity(events.len());
        for (event, decision) in events.iter().zip(decisions) {
            let outcome = match decision {
                PostingDecision::Duplicate(row) => BatchBetOutcome {
                    status: ApplyStatus::Duplicate,
                    transaction: row,
                },
                PostingDecision::Apply(posting) => {
                    balance_after = posting.balance_after;
                    let row = ProviderTransaction {
                        id: Uuid::new_v4(),
                        transaction_id: event.transaction_id.clone(),
                        account_id: event.account_id.clone(),
                        session_id: event.session_id.clone(),
                        round_id: event.round_id.clone(),
                        game_id: event.game_id.clone(),
                        operation_kind: OperationKind::Wager,
                        amount: posting.amount,
                        win_amount: None,
                        balance_before: posting.balance_before,
                        balance_after: posting.balance_after,
                        status: TransactionStatus::Completed,
                        created_at: now,
                    };
                    t.transactions
                        .insert((row.transaction_id.clone(), OperationKind::Wager), row.clone());
                    BatchBetOutcome {
                        status: ApplyStatus::Applied,
                        transaction: row,
                    }
                }
            };
            bets.push(outcome);
        }

        if balance_after != available {
            let balance = t
                .balances
                .entry(key)
                .or_insert_with(|| empty_balance(account.user_id, &account.currency, now));
            balance.available = balance_after;
            balance.updated_at = now;
            if let Some(mirror) = t.accounts.get_mut(&batch.account_id) {
                mirror.balance = balance_after;
                mirror.updated_at = now;
            }
        }

        Ok(BatchOutcome {
            user_id: account.user_id,
            currency: account.currency,
            balance_after,
            bets,
        })
    }

    async fn find_transaction(
        &self,
        transaction_id: &str,
        kind: OperationKind,
    ) -> StoreResult<Option<ProviderTransaction>> {
        Ok(self
            .tables
            .lock()
            .transactions
            .get(&(transaction_id.to_string(), kind))
            .cloned())
    }

    async fn find_divergent_accounts(&self, limit: i64) -> StoreResult<Vec<DivergentAccount>> {
        let t = self.tables.lock();
        let mut divergent: Vec<DivergentAccount> = t
            .accounts
            .values()
            .filter_map(|account| {
                let balance = t
                    .balances
                    .get(&(account.user_id, account.currency.clone()))
                    .map(|b| b.available)
                    .unwrap_or(Decimal::ZERO);
                (balance != account.balance).then(|| DivergentAccount {
                    account_id: account.account_id.clone(),
                    user_id: account.user_id,
                    currency: account.currency.clone(),
                    mirror_balance: account.balance,
                    balance,
                })
            })
            .collect();
        divergent.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        divergent.truncate(limit.max(0) as usize);
        Ok(divergent)
    }

    async fn reconcile(&self, account_id: &str) -> StoreResult<ReconcileOutcome> {
        let mut t = self.tables.lock();
        let account = t
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;
        let balance = t
            .balances
            .get(&(account.user_id, account.currency.clone()))
            .map(|b| b.available)
            .unwrap_or(Decimal::ZERO);

        let corrected = balance != account.balance;
        if corrected {
            if let Some(mirror) = t.accounts.get_mut(account_id) {
                mirror.balance = balance;
                mirror.updated_at = Utc::now();
            }
        }

        Ok(ReconcileOutcome {
            account_id: account.account_id,
            user_id: account.user_id,
            currency: account.currency,
            balance,
            mirror_before: account.balance,
            corrected,
        })
    }
}

#[async_trait]
impl CashbackRepository for MemoryStore {
    async fn tiers(&self) -> StoreResult<Vec<CashbackTier>> {
        let mut tiers = self.tables.lock().tiers.clone();
        tiers.sort_by_key(|t| t.level);
        Ok(tiers)
    }

    async fn house_edge(&self, game_type: &str, game_variant: Option<&str>) -> StoreResult<Option<Decimal>> {
        Ok(self
            .tables
            .lock()
            .house_edges
            .get(&(game_type.to_string(), game_variant.map(str::to_string)))
            .copied())
    }

    async fn user_level(&self, user_id: Uuid) -> StoreResult<UserLevel> {
        let mut t = self.tables.lock();
        ensure_level(&mut t, user_id, Utc::now())
    }

    async fn accrue(&self, request: &AccrualRequest) -> StoreResult<AccrualOutcome> {
        let mut t = self.tables.lock();
        let mut level = ensure_level(&mut t, request.user_id, request.created_at)?;

        if let Some(existing) = t
            .earnings
            .iter()
            .find(|e| e.source_transaction_id == request.source_transaction_id)
            .cloned()
        {
            let tier = tier_by_id(&t, level.tier_id)?;
            return Ok(AccrualOutcome {
                disposition: AccrualDisposition::Duplicate,
                earning: Some(existing),
                level,
                tier,
                promoted_levels: Vec::new(),
            });
        }

        let source_reversed = t.transactions.values().any(|tx| {
            tx.status == TransactionStatus::RolledBack
                && match tx.operation_kind {
                    OperationKind::Wager => tx.transaction_id == request.source_transaction_id,
                    OperationKind::Result => {
                        tx.account_id == request.account_id && tx.round_id == request.round_id
                    }
                    _ => false,
                }
        });
        if source_reversed {
            let tier = tier_by_id(&t, level.tier_id)?;
            return Ok(AccrualOutcome {
                disposition: AccrualDisposition::SourceReversed,
                earning: None,
                level,
                tier,
                promoted_levels: Vec::new(),
            });
        }

        let tier = tier_by_id(&t, level.tier_id)?;
        let rate = request.rate_override.unwrap_or(tier.cashback_percentage);
        let earned = earned_cashback(request.expected_ggr, rate);
        let earning = CashbackEarning {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            tier_id: tier.id,
            source_transaction_id: request.source_transaction_id.clone(),
            expected_ggr: request.expected_ggr,
            cashback_rate: rate,
            earned_amount: earned,
            available_amount: earned,
            status: EarningStatus::Available,
            expires_at: request.expires_at,
            created_at: request.created_at,
        };
        t.earnings.push(earning.clone());

        level.total_ggr_accumulated += request.expected_ggr;
        level.updated_at = request.created_at;
        let entered: Vec<CashbackTier> = promotions(&t.tiers, level.level, level.total_ggr_accumulated)
            .into_iter()
            .cloned()
            .collect();
        let mut current = tier;
        if let Some(top) = entered.last() {
            level.tier_id = top.id;
            level.level = top.level;
            level.last_progressed_at = Some(request.created_at);
            current = top.clone();
        }
        t.levels.insert(request.user_id, level.clone());

        Ok(AccrualOutcome {
            disposition: AccrualDisposition::Created,
            earning: Some(earning),
            level,
            tier: current,
            promoted_levels: entered.iter().map(|t| t.level).collect(),
        })
    }

    async fn void_earning(&self, user_id: Uuid, source_transaction_id: &str) -> StoreResult<Option<VoidOutcome>> {
        let mut t = self.tables.lock();
        let Some(earning) = t.earnings.iter_mut().find(|e| {
            e.user_id == user_id
                && e.source_transaction_id == source_transaction_id
                && matches!(e.status, EarningStatus::Available | EarningStatus::Expired)
        }) else {
            return Ok(None);
        };

        let voided_amount = earning.available_amount;
        earning.available_amount = Decimal::ZERO;
        earning.status = EarningStatus::Voided;
        let earning = earning.clone();

        if let Some(level) = t.levels.get_mut(&user_id) {
            level.total_ggr_accumulated =
                (level.total_ggr_accumulated - earning.expected_ggr).max(Decimal::ZERO);
            level.updated_at = Utc::now();
        }

        Ok(Some(VoidOutcome {
            ggr_reversed: earning.expected_ggr,
            earning,
            voided_amount,
        }))
    }

    async fn claim(
        &self,
        user_id: Uuid,
        amount: Decimal,
        currency: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ClaimOutcome> {
        let mut t = self.tables.lock();
        let level = ensure_level(&mut t, user_id, now)?;
        let tier = tier_by_id(&t, level.tier_id)?;

        let windows = ClaimWindows::containing(now);
        let mut claimed = ClaimedTotals::default();
        for claim in t.claims.iter().filter(|c| c.user_id == user_id) {
            if claim.created_at >= windows.day_start {
                claimed.daily += claim.amount;
            }
            if claim.created_at >= windows.week_start {
                claimed.weekly += claim.amount;
            }
            if claim.created_at >= windows.month_start {
                claimed.monthly += claim.amount;
            }
        }

        let earnings: Vec<CashbackEarning> = t
            .earnings
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        let plan = plan_claim(amount, &earnings, &tier, &claimed, now)?;

        for update in &plan.updates {
            if let Some(earning) = t.earnings.iter_mut().find(|e| e.id == update.earning_id) {
                earning.available_amount = update.available_amount;
                earning.status = update.status;
            }
        }

        let claim = CashbackClaim {
            id: Uuid::new_v4(),
            user_id,
            amount: plan.amount,
            currency: currency.to_string(),
            consumed: plan.consumed,
            created_at: now,
        };
        t.claims.push(claim.clone());
        let balance_after = credit_user(&mut t, user_id, currency, plan.amount, now);

        Ok(ClaimOutcome {
            claim,
            balance_after,
        })
    }

    async fn totals(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<CashbackTotals> {
        let t = self.tables.lock();
        let mut totals = CashbackTotals::default();
        for earning in t.earnings.iter().filter(|e| e.user_id == user_id) {
            if earning.is_claimable(now) {
                totals.available += earning.available_amount;
            }
            if earning.status != EarningStatus::Voided {
                totals.earned += earning.earned_amount;
            }
        }
        totals.claimed = t
            .claims
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.amount)
            .sum();
        Ok(totals)
    }

    async fn earnings(&self, user_id: Uuid, limit: i64, offset: i64) -> StoreResult<Vec<CashbackEarning>> {
        let t = self.tables.lock();
        let mut earnings: Vec<CashbackEarning> = t
            .earnings
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        earnings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(earnings
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn expire_earnings(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut t = self.tables.lock();
        let mut flipped = 0;
        for earning in t
            .earnings
            .iter_mut()
            .filter(|e| e.status == EarningStatus::Available && e.expires_at <= now)
        {
            earning.status = EarningStatus::Expired;
            flipped += 1;
        }
        Ok(flipped)
    }

    async fn rate_override(&self) -> StoreResult<Option<CashbackRateOverride>> {
        Ok(self.tables.lock().rate_override.clone())
    }

    async fn set_rate_override(&self, value: &CashbackRateOverride) -> StoreResult<CashbackRateOverride> {
        self.tables.lock().rate_override = Some(value.clone());
        Ok(value.clone())
    }
}

#[async_trait]
impl OperationRepository for MemoryStore {
    async fn insert(&self, operation: &RetryableOperation) -> StoreResult<()> {
        self.tables
            .lock()
            .operations
            .insert(operation.id, operation.clone());
        Ok(())
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64, lease: Duration) -> StoreResult<Vec<RetryableOperation>> {
        let mut t = self.tables.lock();
        let mut due: Vec<&mut RetryableOperation> = t
            .operations
            .values_mut()
            .filter(|op| op.status == OperationStatus::Pending && op.next_attempt_at <= now)
            .collect();
        due.sort_by_key(|op| op.next_attempt_at);

        Ok(due
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|op| {
                op.next_attempt_at = now + lease;
                op.updated_at = now;
                op.clone()
            })
            .collect())
    }

    async fn record_success(&self, id: Uuid, attempt_count: i32) -> StoreResult<()> {
        if let Some(op) = self.tables.lock().operations.get_mut(&id) {
            op.status = OperationStatus::Succeeded;
            op.attempt_count = attempt_count;
            op.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        attempt_count: i32,
        status: OperationStatus,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> StoreResult<()> {
        if let Some(op) = self.tables.lock().operations.get_mut(&id) {
            op.attempt_count = attempt_count;
            op.status = status;
            op.next_attempt_at = next_attempt_at;
            op.last_error = Some(error.to_string());
            op.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn find(&self, id: Uuid) -> StoreResult<Option<RetryableOperation>> {
        Ok(self.tables.lock().operations.get(&id).cloned())
    }

    async fn list(&self, status: Option<OperationStatus>, limit: i64) -> StoreResult<Vec<RetryableOperation>> {
        let t = self.tables.lock();
        let mut ops: Vec<RetryableOperation> = t
            .operations
            .values()
            .filter(|op| status.map_or(true, |s| op.status == s))
            .cloned()
            .collect();
        ops.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        ops.truncate(limit.max(0) as usize);
        Ok(ops)
    }

    async fn replay(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<RetryableOperation>> {
        let mut t = self.tables.lock();
        let Some(op) = t.operations.get_mut(&id) else {
            return Ok(None);
        };
        if !op.status.is_replayable() {
            return Err(LedgerError::OperationNotAllowed(format!(
                "operation {} is {}",
                id,
                op.status.as_str()
            )));
        }
        op.status = OperationStatus::Pending;
        op.attempt_count = 0;
        op.next_attempt_at = now;
        op.updated_at = now;
        Ok(Some(op.clone()))
    }
}
