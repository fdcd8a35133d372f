use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CashbackTier {
    pub id: Uuid,
    pub name: String,
    pub level: i32,
    pub min_ggr_required: Decimal,
    /// Percent, e.g. 0.5 for 0.5%
    pub cashback_percentage: Decimal,
    pub bonus_multiplier: Decimal,
    pub daily_limit: Option<Decimal>,
    pub weekly_limit: Option<Decimal>,
    pub monthly_limit: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserLevel {
    pub user_id: Uuid,
    pub tier_id: Uuid,
    pub level: i32,
    pub total_ggr_accumulated: Decimal,
    pub last_progressed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarningStatus {
    Available,
    Claimed,
    Expired,
    Voided,
}

impl EarningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EarningStatus::Available => "available",
            EarningStatus::Claimed => "claimed",
            EarningStatus::Expired => "expired",
            EarningStatus::Voided => "voided",
        }
    }
}

impl FromStr for EarningStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "available" => Ok(EarningStatus::Available),
            "claimed" => Ok(EarningStatus::Claimed),
            "expired" => Ok(EarningStatus::Expired),
            "voided" => Ok(EarningStatus::Voided),
            other => Err(format!("unknown earning status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CashbackEarning {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tier_id: Uuid,
    pub source_transaction_id: String,
    pub expected_ggr: Decimal,
    pub cashback_rate: Decimal,
    pub earned_amount: Decimal,
    pub available_amount: Decimal,
    pub status: EarningStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl CashbackEarning {
    /// Claimable regardless of whether the expiry sweep has run yet
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == EarningStatus::Available
            && self.expires_at > now
            && self.available_amount > Decimal::ZERO
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimConsumption {
    pub earning_id: Uuid,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CashbackClaim {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub consumed: Vec<ClaimConsumption>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ClaimOutcome {
    pub claim: CashbackClaim,
    pub balance_after: Decimal,
}

/// Input to the atomic accrual unit
///
/// The cashback rate is read from the user's tier inside the unit unless
/// `rate_override` is set.
#[derive(Debug, Clone)]
pub struct AccrualRequest {
    pub user_id: Uuid,
    pub source_transaction_id: String,
    /// Round scope for the reversal check
    pub account_id: String,
    pub round_id: String,
    /// Active global rate, replaces the tier percentage
    pub rate_override: Option<Decimal>,
    pub expected_ggr: Decimal,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccrualDisposition {
    Created,
    /// An earning already exists for the source transaction
    Duplicate,
    /// The source wager, or any result of the round, was rolled back
    /// before the accrual ran
    SourceReversed,
}

#[derive(Debug, Clone)]
pub struct AccrualOutcome {
    pub disposition: AccrualDisposition,
    /// `None` only for `SourceReversed`
    pub earning: Option<CashbackEarning>,
    pub level: UserLevel,
    /// Tier after any promotion
    pub tier: CashbackTier,
    /// Levels entered by this accrual, lowest first
    pub promoted_levels: Vec<i32>,
}

#[derive(Debug, Clone)]
pub struct VoidOutcome {
    pub earning: CashbackEarning,
    pub voided_amount: Decimal,
    pub ggr_reversed: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl fmt::Display for LimitPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LimitPeriod::Daily => "daily",
            LimitPeriod::Weekly => "weekly",
            LimitPeriod::Monthly => "monthly",
        })
    }
}

/// Amounts already claimed inside the current limit windows
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClaimedTotals {
    pub daily: Decimal,
    pub weekly: Decimal,
    pub monthly: Decimal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CashbackTotals {
    pub available: Decimal,
    pub earned: Decimal,
    pub claimed: Decimal,
}

/// Operator-wide rate replacing every tier's percentage while enabled
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct CashbackRateOverride {
    pub is_enabled: bool,
    /// Percent, same unit as `CashbackTier::cashback_percentage`
    pub override_percentage: Decimal,
    pub enabled_by: Option<Uuid>,
    pub enabled_at: Option<DateTime<Utc>>,
    pub disabled_by: Option<Uuid>,
    pub disabled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CashbackRateOverride {
    pub fn disabled(now: DateTime<Utc>) -> Self {
        Self {
            is_enabled: false,
            override_percentage: Decimal::ZERO,
            enabled_by: None,
            enabled_at: None,
            disabled_by: None,
            disabled_at: None,
            updated_at: now,
        }
    }

    pub fn active_rate(&self) -> Option<Decimal> {
        self.is_enabled.then_some(self.override_percentage)
    }

    /// State after an admin update; disabling keeps who enabled it and when
    pub fn updated(&self, is_enabled: bool, percentage: Decimal, admin: Uuid, now: DateTime<Utc>) -> Self {
        if is_enabled {
            Self {
                is_enabled,
                override_percentage: percentage,
                enabled_by: Some(admin),
                enabled_at: Some(now),
                disabled_by: None,
                disabled_at: None,
                updated_at: now,
            }
        } else {
            Self {
                is_enabled,
                override_percentage: percentage,
                enabled_by: self.enabled_by,
                enabled_at: self.enabled_at,
                disabled_by: Some(admin),
                disabled_at: Some(now),
                updated_at: now,
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CashbackSummary {
    pub user_id: Uuid,
    pub tier: CashbackTier,
    pub total_ggr: Decimal,
    pub level_progress: Decimal,
    pub next_tier_min_ggr: Option<Decimal>,
    pub available_cashback: Decimal,
    pub total_earned: Decimal,
    pub total_claimed: Decimal,
    /// Rate the next accrual uses: the override while enabled, else the tier's
    pub effective_cashback_percentage: Decimal,
    pub rate_override_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rate_override_keeps_enable_audit_when_disabled() {
        let admin = Uuid::new_v4();
        let other = Uuid::new_v4();
        let start = Utc::now();
        let off = CashbackRateOverride::disabled(start);
        assert_eq!(off.active_rate(), None);

        let on = off.updated(true, dec!(5), admin, start);
        assert_eq!(on.active_rate(), Some(dec!(5)));
        assert_eq!(on.enabled_by, Some(admin));
        assert_eq!(on.disabled_by, None);

        let later = start + chrono::Duration::hours(2);
        let off_again = on.updated(false, dec!(5), other, later);
        assert_eq!(off_again.active_rate(), None);
        assert_eq!(off_again.enabled_by, Some(admin));
        assert_eq!(off_again.enabled_at, Some(start));
        assert_eq!(off_again.disabled_by, Some(other));
        assert_eq!(off_again.disabled_at, Some(later));
    }
}
