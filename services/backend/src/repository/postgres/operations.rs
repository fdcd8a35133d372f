use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{convert_all, OperationRow, OPERATION_COLUMNS};
use crate::domain::{OperationStatus, RetryableOperation};
use crate::errors::LedgerError;
use crate::repository::{OperationRepository, StoreResult};

pub struct PostgresOperationRepository {
    pool: PgPool,
}

impl PostgresOperationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Upsert by id; also used by the ledger to write outbox rows in its own transaction
pub(crate) async fn insert_operation(conn: &mut PgConnection, operation: &RetryableOperation) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO retryable_operations (
            id, operation_type, payload, attempt_count, next_attempt_at,
            status, last_error, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (id) DO UPDATE SET
            attempt_count = EXCLUDED.attempt_count,
            next_attempt_at = EXCLUDED.next_attempt_at,
            status = EXCLUDED.status,
            last_error = EXCLUDED.last_error,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(operation.id)
    .bind(&operation.operation_type)
    .bind(&operation.payload)
    .bind(operation.attempt_count)
    .bind(operation.next_attempt_at)
    .bind(operation.status.as_str())
    .bind(&operation.last_error)
    .bind(operation.created_at)
    .bind(operation.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl OperationRepository for PostgresOperationRepository {
    async fn insert(&self, operation: &RetryableOperation) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_operation(&mut conn, operation).await
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64, lease: Duration) -> StoreResult<Vec<RetryableOperation>> {
        // SKIP LOCKED lets concurrent sweepers partition the due set
        let rows = sqlx::query_as::<_, OperationRow>(&format!(
            r#"
            UPDATE retryable_operations
            SET next_attempt_at = $3, updated_at = $1
            WHERE id IN (
                SELECT id FROM retryable_operations
                WHERE status = 'pending' AND next_attempt_at <= $1
                ORDER BY next_attempt_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            OPERATION_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .bind(now + lease)
        .fetch_all(&self.pool)
        .await?;
        let mut operations: Vec<RetryableOperation> = convert_all(rows)?;
        operations.sort_by_key(|op| op.created_at);
        Ok(operations)
    }

    async fn record_success(&self, id: Uuid, attempt_count: i32) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE retryable_operations
            SET status = 'succeeded', attempt_count = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempt_count)
        .execute(&self.pool)
        .await?;
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
        sqlx::query(
            r#"
            UPDATE retryable_operations
            SET attempt_count = $2, status = $3, next_attempt_at = $4,
                last_error = $5, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempt_count)
        .bind(status.as_str())
        .bind(next_attempt_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> StoreResult<Option<RetryableOperation>> {
        let row = sqlx::query_as::<_, OperationRow>(&format!(
            "SELECT {} FROM retryable_operations WHERE id = $1",
            OPERATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(RetryableOperation::try_from).transpose()
    }

    async fn list(&self, status: Option<OperationStatus>, limit: i64) -> StoreResult<Vec<RetryableOperation>> {
        let rows = sqlx::query_as::<_, OperationRow>(&format!(
            r#"
            SELECT {} FROM retryable_operations
            WHERE $1::TEXT IS NULL OR status = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
            OPERATION_COLUMNS
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn replay(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<RetryableOperation>> {
        let mut tx = self.pool.begin().await?;
        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM retryable_operations WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(current) = current else {
            return Ok(None);
        };
        let status: OperationStatus = current.parse().map_err(LedgerError::CorruptRecord)?;
        if !status.is_replayable() {
            return Err(LedgerError::OperationNotAllowed(format!(
                "operation {} is {}",
                id,
                status.as_str()
            )));
        }

        let row = sqlx::query_as::<_, OperationRow>(&format!(
            r#"
            UPDATE retryable_operations
            SET status = 'pending', attempt_count = 0, next_attempt_at = $2, updated_at = $2
            WHERE id = $1
            RETURNING {}
            "#,
            OPERATION_COLUMNS
        ))
        .bind(id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(RetryableOperation::try_from(row)?))
    }
}
