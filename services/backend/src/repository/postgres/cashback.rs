use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{convert_all, EarningRow, LevelRow, TierRow, EARNING_COLUMNS};
use crate::domain::{
    AccrualDisposition, AccrualOutcome, AccrualRequest, CashbackClaim, CashbackEarning,
    CashbackRateOverride, CashbackTier, CashbackTotals, ClaimOutcome, ClaimedTotals, EarningStatus, UserLevel,
    VoidOutcome,
};
use crate::errors::LedgerError;
use crate::ledger::claim::{plan_claim, ClaimWindows};
use crate::ledger::tiers::{earned_cashback, promotions};
use crate::repository::{CashbackRepository, StoreResult};

const TIER_COLUMNS: &str = "id, name, level, min_ggr_required, cashback_percentage, bonus_multiplier, \
     daily_limit, weekly_limit, monthly_limit";

const OVERRIDE_COLUMNS: &str = "is_enabled, override_percentage, enabled_by, enabled_at, \
     disabled_by, disabled_at, updated_at";

const LEVEL_COLUMNS: &str = "user_id, tier_id, level, total_ggr_accumulated, last_progressed_at, updated_at";

pub struct PostgresCashbackRepository {
    pool: PgPool,
}

impl PostgresCashbackRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn load_tiers(conn: &mut PgConnection) -> StoreResult<Vec<CashbackTier>> {
    let rows = sqlx::query_as::<_, TierRow>(&format!(
        "SELECT {} FROM cashback_tiers ORDER BY level",
        TIER_COLUMNS
    ))
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(CashbackTier::from).collect())
}

fn tier_by_id(tiers: &[CashbackTier], tier_id: Uuid) -> StoreResult<CashbackTier> {
    tiers
        .iter()
        .find(|tier| tier.id == tier_id)
        .cloned()
        .ok_or_else(|| LedgerError::CorruptRecord(format!("tier {} not configured", tier_id)))
}

/// Locks the user's level row, initializing it at the lowest tier
async fn lock_level(conn: &mut PgConnection, user_id: Uuid) -> StoreResult<UserLevel> {
    sqlx::query(
        r#"
        INSERT INTO user_levels (user_id, tier_id, level, total_ggr_accumulated, updated_at)
        SELECT $1, id, level, 0, NOW()
        FROM cashback_tiers
        ORDER BY level
        LIMIT 1
        ON CONFLICT (user_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query_as::<_, LevelRow>(&format!(
        "SELECT {} FROM user_levels WHERE user_id = $1 FOR UPDATE",
        LEVEL_COLUMNS
    ))
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| LedgerError::CorruptRecord("no cashback tiers configured".into()))?;
    Ok(row.into())
}

#[async_trait]
impl CashbackRepository for PostgresCashbackRepository {
    async fn tiers(&self) -> StoreResult<Vec<CashbackTier>> {
        let mut conn = self.pool.acquire().await?;
        load_tiers(&mut conn).await
    }

    async fn house_edge(&self, game_type: &str, game_variant: Option<&str>) -> StoreResult<Option<Decimal>> {
        let edge = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT house_edge FROM game_house_edges
            WHERE game_type = $1 AND game_variant IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(game_type)
        .bind(game_variant)
        .fetch_optional(&self.pool)
        .await?;
        Ok(edge)
    }

    async fn user_level(&self, user_id: Uuid) -> StoreResult<UserLevel> {
        let mut tx = self.pool.begin().await?;
        let level = lock_level(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(level)
    }

    async fn accrue(&self, request: &AccrualRequest) -> StoreResult<AccrualOutcome> {
        let mut tx = self.pool.begin().await?;
        let mut level = lock_level(&mut tx, request.user_id).await?;
        let tiers = load_tiers(&mut tx).await?;
        let tier = tier_by_id(&tiers, level.tier_id)?;

        let existing = sqlx::query_as::<_, EarningRow>(&format!(
            "SELECT {} FROM cashback_earnings WHERE source_transaction_id = $1",
            EARNING_COLUMNS
        ))
        .bind(&request.source_transaction_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = existing {
            tx.rollback().await?;
            return Ok(AccrualOutcome {
                disposition: AccrualDisposition::Duplicate,
                earning: Some(CashbackEarning::try_from(row)?),
                level,
                tier,
                promoted_levels: Vec::new(),
            });
        }

        let source_reversed: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM provider_transactions
                WHERE status = 'rolled_back'
                  AND (
                    (transaction_id = $1 AND operation_kind = 'wager')
                    OR (account_id = $2 AND round_id = $3 AND operation_kind = 'result')
                  )
            )
            "#,
        )
        .bind(&request.source_transaction_id)
        .bind(&request.account_id)
        .bind(&request.round_id)
        .fetch_one(&mut *tx)
        .await?;
        if source_reversed {
            tx.rollback().await?;
            return Ok(AccrualOutcome {
                disposition: AccrualDisposition::SourceReversed,
                earning: None,
                level,
                tier,
                promoted_levels: Vec::new(),
            });
        }

        let rate = request.rate_override.unwrap_or(tier.cashback_percentage);
        let earned = earned_cashback(request.expected_ggr, rate);
        let row = sqlx::query_as::<_, EarningRow>(&format!(
            r#"
            INSERT INTO cashback_earnings (
                id, user_id, tier_id, source_transaction_id, expected_ggr, cashback_rate,
                earned_amount, available_amount, status, expires_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7, 'available', $8, $9)
            RETURNING {}
            "#,
            EARNING_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(tier.id)
        .bind(&request.source_transaction_id)
        .bind(request.expected_ggr)
        .bind(rate)
        .bind(earned)
        .bind(request.expires_at)
        .bind(request.created_at)
        .fetch_one(&mut *tx)
        .await?;
        let earning = CashbackEarning::try_from(row)?;

        level.total_ggr_accumulated += request.expected_ggr;
        level.updated_at = request.created_at;
        let entered: Vec<CashbackTier> = promotions(&tiers, level.level, level.total_ggr_accumulated)
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

        sqlx::query(
            r#"
            UPDATE user_levels
            SET tier_id = $2, level = $3, total_ggr_accumulated = $4,
                last_progressed_at = $5, updated_at = $6
            WHERE user_id = $1
            "#,
        )
        .bind(level.user_id)
        .bind(level.tier_id)
        .bind(level.level)
        .bind(level.total_ggr_accumulated)
        .bind(level.last_progressed_at)
        .bind(level.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(AccrualOutcome {
            disposition: AccrualDisposition::Created,
            earning: Some(earning),
            level,
            tier: current,
            promoted_levels: entered.iter().map(|t| t.level).collect(),
        })
    }

    async fn void_earning(&self, user_id: Uuid, source_transaction_id: &str) -> StoreResult<Option<VoidOutcome>> {
        let mut tx = self.pool.begin().await?;
        lock_level(&mut tx, user_id).await?;

        let row = sqlx::query_as::<_, EarningRow>(&format!(
            r#"
            SELECT {} FROM cashback_earnings
            WHERE user_id = $1 AND source_transaction_id = $2 AND status IN ('available', 'expired')
            FOR UPDATE
            "#,
            EARNING_COLUMNS
        ))
        .bind(user_id)
        .bind(source_transaction_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let mut earning = CashbackEarning::try_from(row)?;
        let voided_amount = earning.available_amount;

        sqlx::query(
            "UPDATE cashback_earnings SET available_amount = 0, status = 'voided' WHERE id = $1",
        )
        .bind(earning.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE user_levels
            SET total_ggr_accumulated = GREATEST(total_ggr_accumulated - $2, 0), updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(earning.expected_ggr)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        earning.available_amount = Decimal::ZERO;
        earning.status = EarningStatus::Voided;
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
        let mut tx = self.pool.begin().await?;

        // mirror rows before the balance row, same order as apply
        sqlx::query("SELECT account_id FROM provider_accounts WHERE user_id = $1 AND currency = $2 FOR UPDATE")
            .bind(user_id)
            .bind(currency)
            .fetch_all(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO balances (user_id, currency, available, reserved, updated_at)
            VALUES ($1, $2, 0, 0, NOW())
            ON CONFLICT (user_id, currency) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(currency)
        .execute(&mut *tx)
        .await?;
        sqlx::query("SELECT available FROM balances WHERE user_id = $1 AND currency = $2 FOR UPDATE")
            .bind(user_id)
            .bind(currency)
            .fetch_one(&mut *tx)
            .await?;

        let level = lock_level(&mut tx, user_id).await?;
        let tiers = load_tiers(&mut tx).await?;
        let tier = tier_by_id(&tiers, level.tier_id)?;

        let windows = ClaimWindows::containing(now);
        let (daily, weekly, monthly): (Decimal, Decimal, Decimal) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(amount) FILTER (WHERE created_at >= $2), 0),
                COALESCE(SUM(amount) FILTER (WHERE created_at >= $3), 0),
                COALESCE(SUM(amount) FILTER (WHERE created_at >= $4), 0)
            FROM cashback_claims
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(windows.day_start)
        .bind(windows.week_start)
        .bind(windows.month_start)
        .fetch_one(&mut *tx)
        .await?;
        let claimed = ClaimedTotals { daily, weekly, monthly };

        let rows = sqlx::query_as::<_, EarningRow>(&format!(
            r#"
            SELECT {} FROM cashback_earnings
            WHERE user_id = $1 AND status = 'available' AND expires_at > $2 AND available_amount > 0
            ORDER BY created_at, id
            FOR UPDATE
            "#,
            EARNING_COLUMNS
        ))
        .bind(user_id)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;
        let earnings: Vec<CashbackEarning> = convert_all(rows)?;

        let plan = plan_claim(amount, &earnings, &tier, &claimed, now)?;

        for update in &plan.updates {
            sqlx::query("UPDATE cashback_earnings SET available_amount = $2, status = $3 WHERE id = $1")
                .bind(update.earning_id)
                .bind(update.available_amount)
                .bind(update.status.as_str())
                .execute(&mut *tx)
                .await?;
        }

        let claim = CashbackClaim {
            id: Uuid::new_v4(),
            user_id,
            amount: plan.amount,
            currency: currency.to_string(),
            consumed: plan.consumed,
            created_at: now,
        };
        sqlx::query(
            r#"
            INSERT INTO cashback_claims (id, user_id, amount, currency, consumed, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(claim.id)
        .bind(claim.user_id)
        .bind(claim.amount)
        .bind(&claim.currency)
        .bind(serde_json::to_value(&claim.consumed)?)
        .bind(claim.created_at)
        .execute(&mut *tx)
        .await?;

        let balance_after: Decimal = sqlx::query_scalar(
            r#"
            UPDATE balances SET available = available + $3, updated_at = $4
            WHERE user_id = $1 AND currency = $2
            RETURNING available
            "#,
        )
        .bind(user_id)
        .bind(currency)
        .bind(claim.amount)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE provider_accounts SET balance = $3, updated_at = $4 WHERE user_id = $1 AND currency = $2")
            .bind(user_id)
            .bind(currency)
            .bind(balance_after)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(ClaimOutcome {
            claim,
            balance_after,
        })
    }

    async fn totals(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<CashbackTotals> {
        let (available, earned): (Decimal, Decimal) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(available_amount) FILTER (
                    WHERE status = 'available' AND expires_at > $2 AND available_amount > 0
                ), 0),
                COALESCE(SUM(earned_amount) FILTER (WHERE status <> 'voided'), 0)
            FROM cashback_earnings
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let claimed: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM cashback_claims WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(CashbackTotals {
            available,
            earned,
            claimed,
        })
    }

    async fn earnings(&self, user_id: Uuid, limit: i64, offset: i64) -> StoreResult<Vec<CashbackEarning>> {
        let rows = sqlx::query_as::<_, EarningRow>(&format!(
            r#"
            SELECT {} FROM cashback_earnings
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            EARNING_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn expire_earnings(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE cashback_earnings SET status = 'expired' WHERE status = 'available' AND expires_at <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn rate_override(&self) -> StoreResult<Option<CashbackRateOverride>> {
        let value = sqlx::query_as::<_, CashbackRateOverride>(&format!(
            "SELECT {} FROM cashback_rate_override WHERE singleton",
            OVERRIDE_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn set_rate_override(&self, value: &CashbackRateOverride) -> StoreResult<CashbackRateOverride> {
        let stored = sqlx::query_as::<_, CashbackRateOverride>(&format!(
            r#"
            INSERT INTO cashback_rate_override (
                singleton, is_enabled, override_percentage, enabled_by, enabled_at,
                disabled_by, disabled_at, updated_at
            )
            VALUES (TRUE, $1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (singleton) DO UPDATE SET
                is_enabled = EXCLUDED.is_enabled,
                override_percentage = EXCLUDED.override_percentage,
                enabled_by = EXCLUDED.enabled_by,
                enabled_at = EXCLUDED.enabled_at,
                disabled_by = EXCLUDED.disabled_by,
                disabled_at = EXCLUDED.disabled_at,
                updated_at = EXCLUDED.updated_at
            RETURNING {}
            "#,
            OVERRIDE_COLUMNS
        ))
        .bind(value.is_enabled)
        .bind(value.override_percentage)
        .bind(value.enabled_by)
        .bind(value.enabled_at)
        .bind(value.disabled_by)
        .bind(value.disabled_at)
        .bind(value.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(stored)
    }
}
