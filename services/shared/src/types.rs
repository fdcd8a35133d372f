/// Type-safe wrappers for ledger primitives
///
/// These types enforce validation at construction time so handlers and
/// repositories never see a negative amount or an unknown operation kind.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::constants::MONEY_SCALE;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Amount must not be negative: {0}")]
    NegativeAmount(Decimal),

    #[error("Amount has {scale} decimal places (max {max})")]
    AmountTooPrecise { scale: u32, max: u32 },

    #[error("Amount overflow in operation")]
    AmountOverflow,

    #[error("Unknown operation kind: {0}")]
    UnknownOperationKind(String),

    #[error("Unknown transaction status: {0}")]
    UnknownTransactionStatus(String),
}

/// Non-negative money amount with bounded precision
///
/// Provides checked arithmetic; every result keeps at most `MONEY_SCALE`
/// decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    /// Create a new Amount with validation
    pub fn new(value: Decimal) -> Result<Self, ValidationError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(ValidationError::NegativeAmount(value));
        }
        if value.scale() > MONEY_SCALE {
            return Err(ValidationError::AmountTooPrecise {
                scale: value.scale(),
                max: MONEY_SCALE,
            });
        }
        Ok(Self(value))
    }

    /// Create without validation, rounding to the ledger scale
    pub fn new_unchecked(value: Decimal) -> Self {
        Self(value.round_dp(MONEY_SCALE))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(&self, other: Amount) -> Result<Self, ValidationError> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(ValidationError::AmountOverflow)
    }

    /// Checked subtraction; fails rather than going below zero
    pub fn checked_sub(&self, other: Amount) -> Result<Self, ValidationError> {
        let result = self
            .0
            .checked_sub(other.0)
            .ok_or(ValidationError::AmountOverflow)?;
        Self::new(result)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = ValidationError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = <Decimal as Deserialize>::deserialize(deserializer)?;
        Amount::new(value).map_err(|e| serde::de::Error::custom(format!("Invalid amount: {}", e)))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Aggregator operation kinds
///
/// `(transaction_id, kind)` is the idempotency key of the ledger: a rollback
/// reuses the transaction id of the operation it reverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Wager,
    Result,
    WagerAndResult,
    Rollback,
    RollbackOnResult,
    RollbackOnRollback,
    Jackpot,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Wager => "wager",
            OperationKind::Result => "result",
            OperationKind::WagerAndResult => "wager_and_result",
            OperationKind::Rollback => "rollback",
            OperationKind::RollbackOnResult => "rollback_on_result",
            OperationKind::RollbackOnRollback => "rollback_on_rollback",
            OperationKind::Jackpot => "jackpot",
        }
    }

    /// The kind of the original operation this kind reverses, if any
    pub fn reverses(&self) -> Option<OperationKind> {
        match self {
            OperationKind::Rollback => Some(OperationKind::Wager),
            OperationKind::RollbackOnResult => Some(OperationKind::Result),
            OperationKind::RollbackOnRollback => Some(OperationKind::Rollback),
            _ => None,
        }
    }

    /// Settling kinds close a round and may produce a settlement
    pub fn is_settling(&self) -> bool {
        matches!(self, OperationKind::Result | OperationKind::WagerAndResult)
    }
}

impl FromStr for OperationKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "wager" => Ok(OperationKind::Wager),
            "result" => Ok(OperationKind::Result),
            "wager_and_result" => Ok(OperationKind::WagerAndResult),
            "rollback" => Ok(OperationKind::Rollback),
            "rollback_on_result" => Ok(OperationKind::RollbackOnResult),
            "rollback_on_rollback" => Ok(OperationKind::RollbackOnRollback),
            "jackpot" => Ok(OperationKind::Jackpot),
            other => Err(ValidationError::UnknownOperationKind(other.to_string())),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Completed,
    RolledBack,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
            TransactionStatus::RolledBack => "rolled_back",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "completed" => Ok(TransactionStatus::Completed),
            "rolled_back" => Ok(TransactionStatus::RolledBack),
            other => Err(ValidationError::UnknownTransactionStatus(other.to_string())),
        }
    }
}

/// Aggregator response vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderCode {
    Success,
    Duplicate,
    TechnicalError,
    WagerNotFound,
    OperationNotAllowed,
    OutOfMoney,
}

impl ProviderCode {
    pub fn code(&self) -> u16 {
        match self {
            ProviderCode::Success | ProviderCode::Duplicate => 200,
            ProviderCode::TechnicalError => 1,
            ProviderCode::WagerNotFound => 102,
            ProviderCode::OperationNotAllowed => 110,
            ProviderCode::OutOfMoney => 1006,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            ProviderCode::Success => "Success",
            ProviderCode::Duplicate => "Success - duplicate request",
            ProviderCode::TechnicalError => "Technical error",
            ProviderCode::WagerNotFound => "Wager not found",
            ProviderCode::OperationNotAllowed => "Operation not allowed",
            ProviderCode::OutOfMoney => "Out of money",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_validation() {
        assert_eq!(Amount::new(dec!(10.50)).unwrap().value(), dec!(10.50));
        assert!(Amount::new(Decimal::ZERO).unwrap().is_zero());

        assert!(matches!(
            Amount::new(dec!(-1)),
            Err(ValidationError::NegativeAmount(_))
        ));
        assert!(matches!(
            Amount::new(dec!(0.123456789)),
            Err(ValidationError::AmountTooPrecise { scale: 9, max: 8 })
        ));
    }

    #[test]
    fn test_amount_arithmetic() {
        let a = Amount::new(dec!(100)).unwrap();
        let b = Amount::new(dec!(40.25)).unwrap();

        assert_eq!(a.checked_add(b).unwrap().value(), dec!(140.25));
        assert_eq!(a.checked_sub(b).unwrap().value(), dec!(59.75));
        assert!(b.checked_sub(a).is_err());
    }

    #[test]
    fn test_amount_deserialization_rejects_negative() {
        let ok: Amount = serde_json::from_str("\"12.5\"").unwrap();
        assert_eq!(ok.value(), dec!(12.5));

        let from_int: Amount = serde_json::from_str("7").unwrap();
        assert_eq!(from_int.value(), dec!(7));

        let err = serde_json::from_str::<Amount>("\"-3\"").unwrap_err();
        assert!(err.to_string().contains("Invalid amount"));
    }

    #[test]
    fn test_operation_kind_parsing() {
        for kind in [
            OperationKind::Wager,
            OperationKind::Result,
            OperationKind::WagerAndResult,
            OperationKind::Rollback,
            OperationKind::RollbackOnResult,
            OperationKind::RollbackOnRollback,
            OperationKind::Jackpot,
        ] {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
        }
        assert!("refund".parse::<OperationKind>().is_err());
    }

    #[test]
    fn test_reversal_targets() {
        assert_eq!(OperationKind::Rollback.reverses(), Some(OperationKind::Wager));
        assert_eq!(
            OperationKind::RollbackOnResult.reverses(),
            Some(OperationKind::Result)
        );
        assert_eq!(
            OperationKind::RollbackOnRollback.reverses(),
            Some(OperationKind::Rollback)
        );
        assert_eq!(OperationKind::Jackpot.reverses(), None);
        assert!(OperationKind::WagerAndResult.is_settling());
        assert!(!OperationKind::Wager.is_settling());
    }

    #[test]
    fn test_provider_codes() {
        assert_eq!(ProviderCode::OutOfMoney.code(), 1006);
        assert_eq!(ProviderCode::WagerNotFound.code(), 102);
        assert_eq!(ProviderCode::Duplicate.code(), 200);
        assert_eq!(ProviderCode::Duplicate.status(), "Success - duplicate request");
    }
}
