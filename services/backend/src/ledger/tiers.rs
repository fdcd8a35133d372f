//! GGR, cashback and tier progression arithmetic

use rust_decimal::Decimal;
use shared::MONEY_SCALE;

use crate::domain::CashbackTier;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// bet × house_edge
pub fn expected_ggr(bet_amount: Decimal, house_edge: Decimal) -> Decimal {
    (bet_amount * house_edge).round_dp(MONEY_SCALE)
}

/// GGR × tier percentage (percentage expressed as e.g. 0.5 for 0.5%)
pub fn earned_cashback(expected_ggr: Decimal, cashback_percentage: Decimal) -> Decimal {
    (expected_ggr * cashback_percentage / HUNDRED).round_dp(MONEY_SCALE)
}

/// Lowest configured tier, where new users start
pub fn lowest_tier(tiers: &[CashbackTier]) -> Option<&CashbackTier> {
    tiers.iter().min_by_key(|t| t.level)
}

pub fn next_tier(tiers: &[CashbackTier], current_level: i32) -> Option<&CashbackTier> {
    tiers
        .iter()
        .filter(|t| t.level > current_level)
        .min_by_key(|t| t.level)
}

/// Tiers entered when accumulated GGR reaches `total_ggr`
///
/// Walks one tier at a time and re-checks the next threshold after each
/// step, so close thresholds are all entered and none is skipped.
pub fn promotions<'a>(tiers: &'a [CashbackTier], current_level: i32, total_ggr: Decimal) -> Vec<&'a CashbackTier> {
    let mut entered = Vec::new();
    let mut level = current_level;
    while let Some(next) = next_tier(tiers, level) {
        if total_ggr < next.min_ggr_required {
            break;
        }
        entered.push(next);
        level = next.level;
    }
    entered
}

/// Fraction of the way from the current tier's threshold to the next one,
/// clamped to [0, 1]; 1 at the top tier
pub fn level_progress(total_ggr: Decimal, current: &CashbackTier, next: Option<&CashbackTier>) -> Decimal {
    let Some(next) = next else {
        return Decimal::ONE;
    };
    let span = next.min_ggr_required - current.min_ggr_required;
    if span <= Decimal::ZERO {
        return Decimal::ONE;
    }
    ((total_ggr - current.min_ggr_required) / span)
        .max(Decimal::ZERO)
        .min(Decimal::ONE)
        .round_dp(4)
}
