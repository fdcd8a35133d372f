use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use shared::{OperationKind, TransactionStatus};
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

use super::operations::insert_operation;
use super::{TransactionRow, TRANSACTION_COLUMNS};
use crate::domain::{
    ApplyOutcome, ApplyStatus, BalanceRecord, BatchBetOutcome, BatchOutcome, DivergentAccount,
    ProviderAccount, ProviderEvent, ProviderTransaction, ReconcileOutcome, RetryableOperation,
    WagerBatch,
};
use crate::errors::LedgerError;
use crate::ledger::followups::plan as plan_followups;
use crate::ledger::posting::{decide, decide_batch, Posting, PostingContext, PostingDecision};
use crate::repository::{LedgerRepository, StoreResult};

const ACCOUNT_COLUMNS: &str = "account_id, user_id, currency, balance, created_at, updated_at";

pub struct PostgresLedgerRepository {
    pool: PgPool,
}

impl PostgresLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn lock_account(conn: &mut PgConnection, account_id: &str) -> StoreResult<ProviderAccount> {
    sqlx::query_as::<_, ProviderAccount>(&format!(
        "SELECT {} FROM provider_accounts WHERE account_id = $1 FOR UPDATE",
        ACCOUNT_COLUMNS
    ))
    .bind(account_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
}

/// Locks the balance row, creating it empty when missing
async fn lock_balance(conn: &mut PgConnection, user_id: Uuid, currency: &str) -> StoreResult<Decimal> {
    sqlx::query(
        r#"
        INSERT INTO balances (user_id, currency, available, reserved, updated_at)
        VALUES ($1, $2, 0, 0, NOW())
        ON CONFLICT (user_id, currency) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(currency)
    .execute(&mut *conn)
    .await?;

    let available: Decimal = sqlx::query_scalar(
        "SELECT available FROM balances WHERE user_id = $1 AND currency = $2 FOR UPDATE",
    )
    .bind(user_id)
    .bind(currency)
    .fetch_one(&mut *conn)
    .await?;
    Ok(available)
}

async fn fetch_transaction(
    conn: &mut PgConnection,
    transaction_id: &str,
    kind: OperationKind,
) -> StoreResult<Option<ProviderTransaction>> {
    let row = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {} FROM provider_transactions WHERE transaction_id = $1 AND operation_kind = $2",
        TRANSACTION_COLUMNS
    ))
    .bind(transaction_id)
    .bind(kind.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    row.map(ProviderTransaction::try_from).transpose()
}

async fn latest_round_wager(
    conn: &mut PgConnection,
    account_id: &str,
    round_id: &str,
) -> StoreResult<Option<ProviderTransaction>> {
    let row = sqlx::query_as::<_, TransactionRow>(&format!(
        r#"
        SELECT {} FROM provider_transactions
        WHERE account_id = $1 AND round_id = $2 AND operation_kind = 'wager'
        ORDER BY created_at DESC
        LIMIT 1
        "#,
        TRANSACTION_COLUMNS
    ))
    .bind(account_id)
    .bind(round_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(ProviderTransaction::try_from).transpose()
}

async fn write_balance(
    conn: &mut PgConnection,
    account: &ProviderAccount,
    balance: Decimal,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    sqlx::query(
        "UPDATE balances SET available = $3, updated_at = $4 WHERE user_id = $1 AND currency = $2",
    )
    .bind(account.user_id)
    .bind(&account.currency)
    .bind(balance)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    sqlx::query("UPDATE provider_accounts SET balance = $2, updated_at = $3 WHERE account_id = $1")
        .bind(&account.account_id)
        .bind(balance)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn insert_transaction(
    conn: &mut PgConnection,
    event: &ProviderEvent,
    posting: &Posting,
    now: DateTime<Utc>,
) -> StoreResult<ProviderTransaction> {
    let row = sqlx::query_as::<_, TransactionRow>(&format!(
        r#"
        INSERT INTO provider_transactions (
            id, transaction_id, account_id, session_id, round_id, game_id,
            operation_kind, amount, win_amount, balance_before, balance_after,
            status, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING {}
        "#,
        TRANSACTION_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(&event.transaction_id)
    .bind(&event.account_id)
    .bind(&event.session_id)
    .bind(&event.round_id)
    .bind(&event.game_id)
    .bind(event.kind.as_str())
    .bind(posting.amount)
    .bind(posting.win_amount)
    .bind(posting.balance_before)
    .bind(posting.balance_after)
    .bind(TransactionStatus::Completed.as_str())
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    ProviderTransaction::try_from(row)
}

#[async_trait]
impl LedgerRepository for PostgresLedgerRepository {
    async fn create_account(&self, user_id: Uuid, currency: &str) -> StoreResult<ProviderAccount> {
        let mut tx = self.pool.begin().await?;
        let available = lock_balance(&mut tx, user_id, currency).await?;

        sqlx::query(
            r#"
            INSERT INTO provider_accounts (account_id, user_id, currency, balance, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (user_id, currency) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(currency)
        .bind(available)
        .execute(&mut *tx)
        .await?;

        let account = sqlx::query_as::<_, ProviderAccount>(&format!(
            "SELECT {} FROM provider_accounts WHERE user_id = $1 AND currency = $2",
            ACCOUNT_COLUMNS
        ))
        .bind(user_id)
        .bind(currency)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(account)
    }

    async fn find_account(&self, account_id: &str) -> StoreResult<Option<ProviderAccount>> {
        let account = sqlx::query_as::<_, ProviderAccount>(&format!(
            "SELECT {} FROM provider_accounts WHERE account_id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn balance(&self, user_id: Uuid, currency: &str) -> StoreResult<Option<BalanceRecord>> {
        let balance = sqlx::query_as::<_, BalanceRecord>(
            r#"
            SELECT user_id, currency, available, reserved, updated_at
            FROM balances
            WHERE user_id = $1 AND currency = $2
            "#,
        )
        .bind(user_id)
        .bind(currency)
        .fetch_optional(&self.pool)
        .await?;
        Ok(balance)
    }

    async fn apply(&self, event: &ProviderEvent) -> StoreResult<ApplyOutcome> {
        let mut tx = self.pool.begin().await?;

        let account = lock_account(&mut tx, &event.account_id).await?;
        let available = lock_balance(&mut tx, account.user_id, &account.currency).await?;

        let existing = fetch_transaction(&mut tx, &event.transaction_id, event.kind).await?;
        let original = match event.kind.reverses() {
            Some(kind) => fetch_transaction(&mut tx, &event.transaction_id, kind).await?,
            None => None,
        };

        let posting = match decide(PostingContext {
            event,
            available,
            existing: existing.as_ref(),
            original: original.as_ref(),
        })? {
            PostingDecision::Duplicate(row) => {
                tx.rollback().await?;
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

        write_balance(&mut tx, &account, posting.balance_after, now).await?;

        for flip in &posting.flips {
            sqlx::query(
                "UPDATE provider_transactions SET status = $3 WHERE transaction_id = $1 AND operation_kind = $2",
            )
            .bind(&flip.transaction_id)
            .bind(flip.kind.as_str())
            .bind(flip.status.as_str())
            .execute(&mut *tx)
            .await?;
        }

        let transaction = insert_transaction(&mut tx, event, &posting, now).await?;

        let round_wager = match event.kind {
            OperationKind::Result => latest_round_wager(&mut tx, &event.account_id, &event.round_id).await?,
            OperationKind::RollbackOnResult => match &original {
                Some(result) => latest_round_wager(&mut tx, &event.account_id, &result.round_id).await?,
                None => None,
            },
            _ => None,
        };

        // Outbox: the deferred work commits with the posting or not at all
        let followups = plan_followups(&transaction, round_wager.as_ref(), account.user_id, &account.currency, now)
            .iter()
            .map(|payload| RetryableOperation::queued(payload, now))
            .collect::<serde_json::Result<Vec<_>>>()?;
        for operation in &followups {
            insert_operation(&mut tx, operation).await?;
        }

        tx.commit().await?;

        Ok(ApplyOutcome {
            status: ApplyStatus::Applied,
            transaction,
            user_id: account.user_id,
            currency: account.currency,
            round_wager,
            followups,
        })
    }

    async fn apply_batch(&self, batch: &WagerBatch) -> StoreResult<BatchOutcome> {
        let mut tx = self.pool.begin().await?;

        let account = lock_account(&mut tx, &batch.account_id).await?;
        let available = lock_balance(&mut tx, account.user_id, &account.currency).await?;

        let events = batch.events();
        let mut existing = HashMap::new();
        for event in &events {
            if let Some(row) = fetch_transaction(&mut tx, &event.transaction_id, OperationKind::Wager).await? {
                existing.insert(event.transaction_id.clone(), row);
            }
        }
        let decisions = decide_batch(&events, available, &existing)?;

        let now = Utc::now();
        let mut balance_after = available;
        let mut bets = Vec::with_capacity(events.len());
        for (event, decision) in events.iter().zip(decisions) {
            bets.push(match decision {
                PostingDecision::Duplicate(row) => BatchBetOutcome {
                    status: ApplyStatus::Duplicate,
                    transaction: row,
                },
                PostingDecision::Apply(posting) => {
                    balance_after = posting.balance_after;
                    BatchBetOutcome {
                        status: ApplyStatus::Applied,
                        transaction: insert_transaction(&mut tx, event, &posting, now).await?,
                    }
                }
            });
        }

        if balance_after == available {
            tx.rollback().await?;
        } else {
            write_balance(&mut tx, &account, balance_after, now).await?;
            tx.commit().await?;
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
        let mut conn = self.pool.acquire().await?;
        fetch_transaction(&mut conn, transaction_id, kind).await
    }

    async fn find_divergent_accounts(&self, limit: i64) -> StoreResult<Vec<DivergentAccount>> {
        let accounts = sqlx::query_as::<_, DivergentAccount>(
            r#"
            SELECT a.account_id, a.user_id, a.currency,
                   a.balance AS mirror_balance,
                   COALESCE(b.available, 0) AS balance
            FROM provider_accounts a
            LEFT JOIN balances b ON b.user_id = a.user_id AND b.currency = a.currency
            WHERE a.balance <> COALESCE(b.available, 0)
            ORDER BY a.account_id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    async fn reconcile(&self, account_id: &str) -> StoreResult<ReconcileOutcome> {
        let mut tx = self.pool.begin().await?;
        let account = lock_account(&mut tx, account_id).await?;
        let balance = lock_balance(&mut tx, account.user_id, &account.currency).await?;

        let corrected = balance != account.balance;
        if corrected {
            sqlx::query("UPDATE provider_accounts SET balance = $2, updated_at = NOW() WHERE account_id = $1")
                .bind(account_id)
                .bind(balance)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

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
