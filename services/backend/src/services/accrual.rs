//! GGR/cashback accrual engine

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use shared::{
    CASHBACK_TTL_DAYS, DEFAULT_CURRENCY, DEFAULT_PROVIDER_OPERATOR, MAX_RATE_OVERRIDE_PERCENT,
};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use crate::domain::{
    AccrualDisposition, AccrualOutcome, AccrualRequest, CashbackEarning, CashbackRateOverride,
    CashbackSummary, CashbackTier, ClaimOutcome, Settlement, VoidOutcome,
};
use crate::errors::LedgerError;
use crate::fanout::{LedgerEvent, Publisher};
use crate::ledger::tiers::{expected_ggr, level_progress, next_tier};
use crate::repository::{CashbackRepository, StoreResult};

#[derive(Debug, Clone)]
pub struct AccrualSettings {
    /// game_type key of the house-edge table
    pub operator: String,
    /// Used when neither the game nor the operator has an edge configured
    pub default_house_edge: Decimal,
    pub cashback_ttl_days: i64,
    pub currency: String,
}

impl Default for AccrualSettings {
    fn default() -> Self {
        Self {
            operator: DEFAULT_PROVIDER_OPERATOR.to_string(),
            default_house_edge: Decimal::ZERO,
            cashback_ttl_days: CASHBACK_TTL_DAYS,
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

pub struct AccrualEngine {
    cashback: Arc<dyn CashbackRepository>,
    publisher: Arc<dyn Publisher>,
    settings: AccrualSettings,
}

impl AccrualEngine {
    pub fn new(
        cashback: Arc<dyn CashbackRepository>,
        publisher: Arc<dyn Publisher>,
        settings: AccrualSettings,
    ) -> Self {
        Self {
            cashback,
            publisher,
            settings,
        }
    }

    pub fn settings(&self) -> &AccrualSettings {
        &self.settings
    }

    /// Exact game edge, then operator default, then the global default
    pub async fn house_edge(&self, game_id: Option<&str>) -> StoreResult<Decimal> {
        let operator = self.settings.operator.as_str();
        if let Some(game_id) = game_id {
            if let Some(edge) = self.cashback.house_edge(operator, Some(game_id)).await? {
                return Ok(edge);
            }
        }
        if let Some(edge) = self.cashback.house_edge(operator, None).await? {
            return Ok(edge);
        }
        tracing::debug!(operator, game_id, "No house edge configured, using default");
        Ok(self.settings.default_house_edge)
    }

    /// Accrue cashback for a settled losing round; idempotent per source wager
    pub async fn on_settlement(&self, settlement: &Settlement) -> StoreResult<AccrualOutcome> {
        let edge = self.house_edge(settlement.game_id.as_deref()).await?;
        let ggr = expected_ggr(settlement.bet_amount, edge);
        let rate_override = self
            .cashback
            .rate_override()
            .await?
            .and_then(|o| o.active_rate());
        let now = Utc::now();

        let outcome = self
            .cashback
            .accrue(&AccrualRequest {
                user_id: settlement.user_id,
                source_transaction_id: settlement.source_transaction_id.clone(),
                account_id: settlement.account_id.clone(),
                round_id: settlement.round_id.clone(),
                rate_override,
                expected_ggr: ggr,
                created_at: now,
                expires_at: now + Duration::days(self.settings.cashback_ttl_days),
            })
            .await?;

        match outcome.disposition {
            AccrualDisposition::Created => {
                metrics::counter!("cashback_accruals_total").increment(1);
                let earned = outcome
                    .earning
                    .as_ref()
                    .map(|e| e.earned_amount)
                    .unwrap_or_default();
                tracing::info!(
                    user_id = %settlement.user_id,
                    source_transaction_id = %settlement.source_transaction_id,
                    settling_transaction_id = %settlement.settling_transaction_id,
                    bet_amount = %settlement.bet_amount,
                    house_edge = %edge,
                    expected_ggr = %ggr,
                    earned = %earned,
                    rate_override = ?rate_override,
                    tier = %outcome.tier.name,
                    "Cashback accrued"
                );
                if !outcome.promoted_levels.is_empty() {
                    tracing::info!(
                        user_id = %settlement.user_id,
                        levels = ?outcome.promoted_levels,
                        tier = %outcome.tier.name,
                        total_ggr = %outcome.level.total_ggr_accumulated,
                        "Tier progression"
                    );
                }
                self.publish_cashback(settlement.user_id, &outcome.tier).await;
            }
            AccrualDisposition::Duplicate => {
                tracing::debug!(
                    source_transaction_id = %settlement.source_transaction_id,
                    "Cashback already accrued"
                );
            }
            AccrualDisposition::SourceReversed => {
                tracing::info!(
                    source_transaction_id = %settlement.source_transaction_id,
                    round_id = %settlement.round_id,
                    "Round reversed, no cashback accrued"
                );
            }
        }

        Ok(outcome)
    }

    /// Void the unclaimed remainder of the earning sourced from a reversed wager
    pub async fn void(&self, user_id: Uuid, source_transaction_id: &str) -> StoreResult<Option<VoidOutcome>> {
        let outcome = self
            .cashback
            .void_earning(user_id, source_transaction_id)
            .await?;

        match &outcome {
            Some(voided) => {
                tracing::info!(
                    %user_id,
                    source_transaction_id,
                    voided_amount = %voided.voided_amount,
                    ggr_reversed = %voided.ggr_reversed,
                    "Cashback earning voided"
                );
                if let Ok(tier) = self.current_tier(user_id).await {
                    self.publish_cashback(user_id, &tier).await;
                }
            }
            None => {
                tracing::debug!(%user_id, source_transaction_id, "No open earning to void");
            }
        }
        Ok(outcome)
    }

    pub async fn claim(&self, user_id: Uuid, amount: Decimal, currency: &str) -> StoreResult<ClaimOutcome> {
        let span = tracing::info_span!("cashback_claim", %user_id, %amount, currency);
        self.claim_inner(user_id, amount, currency).instrument(span).await
    }

    async fn claim_inner(&self, user_id: Uuid, amount: Decimal, currency: &str) -> StoreResult<ClaimOutcome> {
        let outcome = match self.cashback.claim(user_id, amount, currency, Utc::now()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::info!(%user_id, %amount, error = %e, "Cashback claim rejected");
                return Err(e);
            }
        };

        metrics::counter!("cashback_claims_total").increment(1);
        tracing::info!(
            %user_id,
            claim_id = %outcome.claim.id,
            amount = %outcome.claim.amount,
            earnings = outcome.claim.consumed.len(),
            balance = %outcome.balance_after,
            "Cashback claimed"
        );

        self.publisher.publish(
            user_id,
            LedgerEvent::BalanceChanged {
                balance: outcome.balance_after,
                currency: currency.to_string(),
            },
        );
        if let Ok(tier) = self.current_tier(user_id).await {
            self.publish_cashback(user_id, &tier).await;
        }
        Ok(outcome)
    }

    pub async fn summary(&self, user_id: Uuid) -> StoreResult<CashbackSummary> {
        let level = self.cashback.user_level(user_id).await?;
        let tiers = self.cashback.tiers().await?;
        let tier = tiers
            .iter()
            .find(|t| t.id == level.tier_id)
            .cloned()
            .ok_or_else(|| LedgerError::CorruptRecord(format!("tier {} not configured", level.tier_id)))?;
        let next = next_tier(&tiers, tier.level);
        let totals = self.cashback.totals(user_id, Utc::now()).await?;
        let active_override = self.rate_override().await?.active_rate();

        Ok(CashbackSummary {
            user_id,
            level_progress: level_progress(level.total_ggr_accumulated, &tier, next),
            next_tier_min_ggr: next.map(|t| t.min_ggr_required),
            total_ggr: level.total_ggr_accumulated,
            available_cashback: totals.available,
            total_earned: totals.earned,
            total_claimed: totals.claimed,
            effective_cashback_percentage: active_override.unwrap_or(tier.cashback_percentage),
            rate_override_active: active_override.is_some(),
            tier,
        })
    }

    /// Current global rate override, disabled when never set
    pub async fn rate_override(&self) -> StoreResult<CashbackRateOverride> {
        Ok(self
            .cashback
            .rate_override()
            .await?
            .unwrap_or_else(|| CashbackRateOverride::disabled(Utc::now())))
    }

    pub async fn set_rate_override(
        &self,
        admin: Uuid,
        is_enabled: bool,
        percentage: Decimal,
    ) -> StoreResult<CashbackRateOverride> {
        if percentage < Decimal::ZERO || percentage > MAX_RATE_OVERRIDE_PERCENT {
            return Err(LedgerError::InvalidAmount(format!(
                "override percentage {} outside 0..={}",
                percentage, MAX_RATE_OVERRIDE_PERCENT
            )));
        }

        let current = self.rate_override().await?;
        let updated = self
            .cashback
            .set_rate_override(&current.updated(is_enabled, percentage, admin, Utc::now()))
            .await?;

        tracing::info!(
            admin_user_id = %admin,
            is_enabled = updated.is_enabled,
            override_percentage = %updated.override_percentage,
            "Global cashback rate override updated"
        );
        Ok(updated)
    }

    pub async fn earnings(&self, user_id: Uuid, limit: i64, offset: i64) -> StoreResult<Vec<CashbackEarning>> {
        self.cashback.earnings(user_id, limit, offset).await
    }

    pub async fn expire(&self) -> StoreResult<u64> {
        let expired = self.cashback.expire_earnings(Utc::now()).await?;
        if expired > 0 {
            tracing::info!(expired, "Cashback earnings expired");
        }
        Ok(expired)
    }

    async fn current_tier(&self, user_id: Uuid) -> StoreResult<CashbackTier> {
        let level = self.cashback.user_level(user_id).await?;
        self.cashback
            .tiers()
            .await?
            .into_iter()
            .find(|t| t.id == level.tier_id)
            .ok_or_else(|| LedgerError::CorruptRecord(format!("tier {} not configured", level.tier_id)))
    }

    async fn publish_cashback(&self, user_id: Uuid, tier: &CashbackTier) {
        match self.cashback.totals(user_id, Utc::now()).await {
            Ok(totals) => self.publisher.publish(
                user_id,
                LedgerEvent::CashbackChanged {
                    available_cashback: totals.available,
                    tier: tier.name.clone(),
                },
            ),
            Err(e) => tracing::warn!(%user_id, error = %e, "Skipping cashback notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::FanoutHub;
    use crate::repository::MemoryStore;
    use rust_decimal_macros::dec;

    fn engine(store: Arc<MemoryStore>) -> AccrualEngine {
        AccrualEngine::new(store, Arc::new(FanoutHub::new(8)), AccrualSettings::default())
    }

    fn settlement(user_id: Uuid, source: &str, bet: Decimal) -> Settlement {
        Settlement {
            user_id,
            account_id: "acc-1".to_string(),
            source_transaction_id: source.to_string(),
            settling_transaction_id: format!("res-{}", source),
            round_id: format!("round-{}", source),
            game_id: Some("slot-1".to_string()),
            bet_amount: bet,
            win_amount: Decimal::ZERO,
            currency: "USD".to_string(),
            settled_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_house_edge_precedence() {
        let store = Arc::new(MemoryStore::with_default_tiers());
        let engine = engine(store.clone());
        assert_eq!(engine.house_edge(Some("slot-1")).await.unwrap(), Decimal::ZERO);

        store.set_house_edge(DEFAULT_PROVIDER_OPERATOR, None, dec!(0.03));
        assert_eq!(engine.house_edge(Some("slot-1")).await.unwrap(), dec!(0.03));
        assert_eq!(engine.house_edge(None).await.unwrap(), dec!(0.03));

        store.set_house_edge(DEFAULT_PROVIDER_OPERATOR, Some("slot-1"), dec!(0.02));
        assert_eq!(engine.house_edge(Some("slot-1")).await.unwrap(), dec!(0.02));
        assert_eq!(engine.house_edge(Some("slot-2")).await.unwrap(), dec!(0.03));
    }

    #[tokio::test]
    async fn test_bronze_accrual_example() {
        let store = Arc::new(MemoryStore::with_default_tiers());
        store.set_house_edge(DEFAULT_PROVIDER_OPERATOR, Some("slot-1"), dec!(0.02));
        let engine = engine(store.clone());
        let user = Uuid::new_v4();

        let outcome = engine.on_settlement(&settlement(user, "w-1", dec!(100))).await.unwrap();
        assert_eq!(outcome.disposition, AccrualDisposition::Created);
        let earning = outcome.earning.unwrap();
        assert_eq!(earning.expected_ggr, dec!(2.00));
        assert_eq!(earning.earned_amount, dec!(0.01));
        assert_eq!(earning.available_amount, dec!(0.01));
        assert_eq!(outcome.tier.name, "Bronze");
    }

    #[tokio::test]
    async fn test_accrual_is_idempotent_per_source() {
        let store = Arc::new(MemoryStore::with_default_tiers());
        store.set_house_edge(DEFAULT_PROVIDER_OPERATOR, None, dec!(0.02));
        let engine = engine(store.clone());
        let user = Uuid::new_v4();

        engine.on_settlement(&settlement(user, "w-1", dec!(100))).await.unwrap();
        let again = engine.on_settlement(&settlement(user, "w-1", dec!(100))).await.unwrap();
        assert_eq!(again.disposition, AccrualDisposition::Duplicate);

        let summary = engine.summary(user).await.unwrap();
        assert_eq!(summary.total_ggr, dec!(2.00));
        assert_eq!(summary.available_cashback, dec!(0.01));
    }

    #[tokio::test]
    async fn test_large_settlement_walks_tiers() {
        let store = Arc::new(MemoryStore::with_default_tiers());
        store.set_house_edge(DEFAULT_PROVIDER_OPERATOR, None, dec!(0.5));
        let engine = engine(store.clone());
        let user = Uuid::new_v4();

        // 12_000 * 0.5 = 6_000 GGR crosses Silver (1_000) and Gold (5_000)
        let outcome = engine.on_settlement(&settlement(user, "w-1", dec!(12000))).await.unwrap();
        assert_eq!(outcome.promoted_levels, vec![2, 3]);
        assert_eq!(outcome.tier.name, "Gold");
        // rate of the tier held at settlement time
        assert_eq!(outcome.earning.unwrap().cashback_rate, dec!(0.5));

        let next = engine.on_settlement(&settlement(user, "w-2", dec!(2))).await.unwrap();
        assert_eq!(next.earning.unwrap().cashback_rate, dec!(1.5));
    }

    #[tokio::test]
    async fn test_void_reverses_unclaimed_earning_without_demotion() {
        let store = Arc::new(MemoryStore::with_default_tiers());
        store.set_house_edge(DEFAULT_PROVIDER_OPERATOR, None, dec!(0.5));
        let engine = engine(store.clone());
        let user = Uuid::new_v4();

        engine.on_settlement(&settlement(user, "w-1", dec!(2000))).await.unwrap();
        let voided = engine.void(user, "w-1").await.unwrap().unwrap();
        assert_eq!(voided.ggr_reversed, dec!(1000));

        let summary = engine.summary(user).await.unwrap();
        assert_eq!(summary.total_ggr, Decimal::ZERO);
        assert_eq!(summary.available_cashback, Decimal::ZERO);
        assert_eq!(summary.tier.name, "Silver");

        // second void is a no-op
        assert!(engine.void(user, "w-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rate_override_replaces_tier_percentage() {
        let store = Arc::new(MemoryStore::with_default_tiers());
        store.set_house_edge(DEFAULT_PROVIDER_OPERATOR, None, dec!(0.02));
        let engine = engine(store.clone());
        let user = Uuid::new_v4();
        let admin = Uuid::new_v4();

        let updated = engine.set_rate_override(admin, true, dec!(5)).await.unwrap();
        assert!(updated.is_enabled);
        assert_eq!(updated.enabled_by, Some(admin));

        // 100 * 0.02 = 2 GGR at 5% instead of Bronze's 0.5%
        let outcome = engine.on_settlement(&settlement(user, "w-1", dec!(100))).await.unwrap();
        let earning = outcome.earning.unwrap();
        assert_eq!(earning.cashback_rate, dec!(5));
        assert_eq!(earning.earned_amount, dec!(0.10));

        let summary = engine.summary(user).await.unwrap();
        assert!(summary.rate_override_active);
        assert_eq!(summary.effective_cashback_percentage, dec!(5));

        let disabled = engine.set_rate_override(admin, false, dec!(5)).await.unwrap();
        assert_eq!(disabled.enabled_by, Some(admin));
        assert_eq!(disabled.disabled_by, Some(admin));

        let next = engine.on_settlement(&settlement(user, "w-2", dec!(100))).await.unwrap();
        assert_eq!(next.earning.unwrap().cashback_rate, dec!(0.5));
        let summary = engine.summary(user).await.unwrap();
        assert!(!summary.rate_override_active);
        assert_eq!(summary.effective_cashback_percentage, dec!(0.5));
    }

    #[tokio::test]
    async fn test_rate_override_bounds() {
        let store = Arc::new(MemoryStore::with_default_tiers());
        let engine = engine(store);
        let admin = Uuid::new_v4();

        assert!(!engine.rate_override().await.unwrap().is_enabled);
        assert!(matches!(
            engine.set_rate_override(admin, true, dec!(100.5)).await,
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            engine.set_rate_override(admin, true, dec!(-1)).await,
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(engine.set_rate_override(admin, true, dec!(100)).await.is_ok());
    }

    #[tokio::test]
    async fn test_summary_for_new_user() {
        let store = Arc::new(MemoryStore::with_default_tiers());
        let engine = engine(store);
        let summary = engine.summary(Uuid::new_v4()).await.unwrap();
        assert_eq!(summary.tier.name, "Bronze");
        assert_eq!(summary.level_progress, Decimal::ZERO);
        assert_eq!(summary.next_tier_min_ggr, Some(dec!(1000)));
    }
}
