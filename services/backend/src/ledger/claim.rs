//! Cashback claim planning
//!
//! Claims consume claimable earnings oldest-first and are capped by the
//! tightest of the tier's daily, weekly and monthly limits.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::domain::{
    CashbackEarning, CashbackTier, ClaimConsumption, ClaimedTotals, EarningStatus, LimitPeriod,
};
use crate::errors::LedgerError;

/// Start instants of the limit windows containing `now` (UTC)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClaimWindows {
    pub day_start: DateTime<Utc>,
    /// ISO week, Monday 00:00
    pub week_start: DateTime<Utc>,
    pub month_start: DateTime<Utc>,
}

impl ClaimWindows {
    pub fn containing(now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        let midnight = |date: chrono::NaiveDate| Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));

        let day_start = midnight(today);
        let week_start =
            day_start - Duration::days(i64::from(today.weekday().num_days_from_monday()));
        let month_start = midnight(today.with_day(1).unwrap_or(today));

        Self {
            day_start,
            week_start,
            month_start,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EarningUpdate {
    pub earning_id: uuid::Uuid,
    pub available_amount: Decimal,
    pub status: EarningStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClaimPlan {
    pub amount: Decimal,
    pub consumed: Vec<ClaimConsumption>,
    pub updates: Vec<EarningUpdate>,
}

/// Tightest configured limit: (period, remaining headroom)
pub fn binding_limit(tier: &CashbackTier, claimed: &ClaimedTotals) -> Option<(LimitPeriod, Decimal)> {
    [
        (LimitPeriod::Daily, tier.daily_limit, claimed.daily),
        (LimitPeriod::Weekly, tier.weekly_limit, claimed.weekly),
        (LimitPeriod::Monthly, tier.monthly_limit, claimed.monthly),
    ]
    .into_iter()
    .filter_map(|(period, limit, used)| {
        limit.map(|limit| (period, (limit - used).max(Decimal::ZERO)))
    })
    .min_by(|a, b| a.1.cmp(&b.1))
}

pub fn plan_claim(
    amount: Decimal,
    earnings: &[CashbackEarning],
    tier: &CashbackTier,
    claimed: &ClaimedTotals,
    now: DateTime<Utc>,
) -> Result<ClaimPlan, LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "claim amount must be positive, got {}",
            amount
        )));
    }

    let mut claimable: Vec<&CashbackEarning> =
        earnings.iter().filter(|e| e.is_claimable(now)).collect();
    claimable.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let available: Decimal = claimable.iter().map(|e| e.available_amount).sum();
    if amount > available {
        return Err(LedgerError::ClaimExceedsAvailable {
            requested: amount,
            available,
        });
    }

    if let Some((period, remaining)) = binding_limit(tier, claimed) {
        if amount > remaining {
            return Err(LedgerError::ClaimLimitExceeded { period, remaining });
        }
    }

    let mut outstanding = amount;
    let mut consumed = Vec::new();
    let mut updates = Vec::new();

    for earning in claimable {
        if outstanding.is_zero() {
            break;
        }
        let take = outstanding.min(earning.available_amount);
        let left = earning.available_amount - take;
        outstanding -= take;

        consumed.push(ClaimConsumption {
            earning_id: earning.id,
            amount: take,
        });
        updates.push(EarningUpdate {
            earning_id: earning.id,
            available_amount: left,
            status: if left.is_zero() {
                EarningStatus::Claimed
            } else {
                EarningStatus::Available
            },
        });
    }

    Ok(ClaimPlan {
        amount,
        consumed,
        updates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn tier(daily: Option<Decimal>, weekly: Option<Decimal>, monthly: Option<Decimal>) -> CashbackTier {
        CashbackTier {
            id: Uuid::new_v4(),
            name: "Bronze".to_string(),
            level: 1,
            min_ggr_required: Decimal::ZERO,
            cashback_percentage: dec!(0.5),
            bonus_multiplier: dec!(1),
            daily_limit: daily,
            weekly_limit: weekly,
            monthly_limit: monthly,
        }
    }

    fn earning(available: Decimal, age_hours: i64, now: DateTime<Utc>) -> CashbackEarning {
        let created_at = now - Duration::hours(age_hours);
        CashbackEarning {
            id: Uuid::new_v4(),
            user_id: Uuid::nil(),
            tier_id: Uuid::nil(),
            source_transaction_id: format!("w-{}", age_hours),
            expected_ggr: available * dec!(200),
            cashback_rate: dec!(0.5),
            earned_amount: available,
            available_amount: available,
            status: EarningStatus::Available,
            expires_at: created_at + Duration::days(30),
            created_at,
        }
    }

    #[test]
    fn test_windows_start_on_monday_and_first_of_month() {
        // Thursday 2024-05-16 15:30 UTC
        let now = Utc.with_ymd_and_hms(2024, 5, 16, 15, 30, 0).unwrap();
        let windows = ClaimWindows::containing(now);
        assert_eq!(windows.day_start, Utc.with_ymd_and_hms(2024, 5, 16, 0, 0, 0).unwrap());
        assert_eq!(windows.week_start, Utc.with_ymd_and_hms(2024, 5, 13, 0, 0, 0).unwrap());
        assert_eq!(windows.month_start, Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_fifo_with_partial_consumption() {
        let now = Utc::now();
        let oldest = earning(dec!(3), 48, now);
        let middle = earning(dec!(4), 24, now);
        let newest = earning(dec!(5), 1, now);
        let earnings = vec![newest.clone(), oldest.clone(), middle.clone()];

        let plan = plan_claim(dec!(5), &earnings, &tier(None, None, None), &ClaimedTotals::default(), now)
            .unwrap();

        assert_eq!(
            plan.consumed,
            vec![
                ClaimConsumption { earning_id: oldest.id, amount: dec!(3) },
                ClaimConsumption { earning_id: middle.id, amount: dec!(2) },
            ]
        );
        assert_eq!(plan.updates[0].status, EarningStatus::Claimed);
        assert_eq!(plan.updates[1].status, EarningStatus::Available);
        assert_eq!(plan.updates[1].available_amount, dec!(2));
    }

    #[test]
    fn test_expired_earnings_are_not_claimable() {
        let now = Utc::now();
        let mut stale = earning(dec!(10), 24 * 31, now);
        stale.status = EarningStatus::Available;
        let fresh = earning(dec!(1), 1, now);

        let result = plan_claim(
            dec!(2),
            &[stale, fresh],
            &tier(None, None, None),
            &ClaimedTotals::default(),
            now,
        );
        assert!(matches!(
            result,
            Err(LedgerError::ClaimExceedsAvailable { available, .. }) if available == dec!(1)
        ));
    }

    #[test]
    fn test_tightest_limit_binds() {
        let claimed = ClaimedTotals {
            daily: dec!(10),
            weekly: dec!(95),
            monthly: dec!(100),
        };
        let t = tier(Some(dec!(50)), Some(dec!(100)), Some(dec!(500)));
        assert_eq!(binding_limit(&t, &claimed), Some((LimitPeriod::Weekly, dec!(5))));

        let now = Utc::now();
        let result = plan_claim(dec!(6), &[earning(dec!(20), 1, now)], &t, &claimed, now);
        assert!(matches!(
            result,
            Err(LedgerError::ClaimLimitExceeded { period: LimitPeriod::Weekly, remaining }) if remaining == dec!(5)
        ));
    }

    #[test]
    fn test_no_limits_configured() {
        assert_eq!(binding_limit(&tier(None, None, None), &ClaimedTotals::default()), None);
    }

    #[test]
    fn test_non_positive_claim_rejected() {
        let now = Utc::now();
        let result = plan_claim(Decimal::ZERO, &[earning(dec!(1), 1, now)], &tier(None, None, None), &ClaimedTotals::default(), now);
        assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));
    }
}
