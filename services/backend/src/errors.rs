use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde_json::json;
use shared::{ProviderCode, ServiceError, ValidationError};
use uuid::Uuid;

use crate::domain::LimitPeriod;

/// Ledger taxonomy shared by repositories and services
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Operation not allowed: {0}")]
    OperationNotAllowed(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Claim amount {requested} exceeds available cashback {available}")]
    ClaimExceedsAvailable { requested: Decimal, available: Decimal },

    #[error("Claim amount exceeds {period} limit (remaining {remaining})")]
    ClaimLimitExceeded { period: LimitPeriod, remaining: Decimal },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),
}

impl LedgerError {
    /// Transient failures are retried; everything else is permanent
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::StoreUnavailable(_))
    }

    /// Aggregator vocabulary for a rejected event
    pub fn provider_code(&self) -> ProviderCode {
        match self {
            LedgerError::InsufficientFunds { .. } => ProviderCode::OutOfMoney,
            LedgerError::TransactionNotFound(_) => ProviderCode::WagerNotFound,
            LedgerError::AccountNotFound(_) | LedgerError::OperationNotAllowed(_) => {
                ProviderCode::OperationNotAllowed
            }
            _ => ProviderCode::TechnicalError,
        }
    }

    pub fn to_service_error(&self) -> ServiceError {
        match self {
            LedgerError::InsufficientFunds { required, available } => {
                ServiceError::insufficient_funds(required, available)
            }
            LedgerError::TransactionNotFound(id) => ServiceError::transaction_not_found(id),
            LedgerError::AccountNotFound(id) => ServiceError::account_not_found(id),
            LedgerError::OperationNotAllowed(reason) => ServiceError::operation_not_allowed(reason.clone()),
            LedgerError::InvalidAmount(reason) => ServiceError::invalid_amount("request", reason.clone()),
            LedgerError::ClaimExceedsAvailable { requested, available } => {
                ServiceError::claim_exceeds_available(requested, available)
            }
            LedgerError::ClaimLimitExceeded { period, remaining } => {
                ServiceError::claim_limit_exceeded(period, remaining)
            }
            LedgerError::StoreUnavailable(e) => ServiceError::database_error(e),
            LedgerError::CorruptRecord(e) => ServiceError::serialization_error(e),
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => LedgerError::StoreUnavailable(error.to_string()),
            // serialization_failure / deadlock_detected
            sqlx::Error::Database(db)
                if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) =>
            {
                LedgerError::StoreUnavailable(error.to_string())
            }
            _ => LedgerError::CorruptRecord(error.to_string()),
        }
    }
}

impl From<ValidationError> for LedgerError {
    fn from(error: ValidationError) -> Self {
        match error {
            ValidationError::NegativeAmount(_)
            | ValidationError::AmountTooPrecise { .. }
            | ValidationError::AmountOverflow => LedgerError::InvalidAmount(error.to_string()),
            _ => LedgerError::CorruptRecord(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(error: serde_json::Error) -> Self {
        LedgerError::CorruptRecord(error.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Operation not found: {0}")]
    OperationNotFound(Uuid),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn to_service_error(&self) -> ServiceError {
        match self {
            AppError::Ledger(e) => e.to_service_error(),
            AppError::Redis(e) => ServiceError::redis_error(e),
            AppError::OperationNotFound(id) => ServiceError::operation_not_found(id),
            AppError::InvalidInput(msg) => ServiceError::invalid_input(msg.clone()),
            AppError::Unauthorized => ServiceError::missing_identity(),
            AppError::Internal(_) => ServiceError::internal("Internal server error"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let error = self.to_service_error();
        match error.category.log_level() {
            "error" => tracing::error!(error_code = %error.code, error = ?self, "Request failed"),
            "warn" => tracing::warn!(error_code = %error.code, error = %self, "Request rejected"),
            _ => tracing::info!(error_code = %error.code, error = %self, "Request rejected"),
        }

        metrics::counter!(
            "errors_total",
            "category" => format!("{:?}", error.category),
            "code" => error.code.clone()
        )
        .increment(1);

        let status = StatusCode::from_u16(error.category.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = Json(json!({
            "error": {
                "code": error.code,
                "message": error.message,
                "category": error.category,
            }
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use shared::ErrorCategory;

    #[test]
    fn test_provider_code_mapping() {
        let insufficient = LedgerError::InsufficientFunds {
            required: dec!(10),
            available: dec!(5),
        };
        assert_eq!(insufficient.provider_code(), ProviderCode::OutOfMoney);
        assert_eq!(
            LedgerError::TransactionNotFound("tx".into()).provider_code(),
            ProviderCode::WagerNotFound
        );
        assert_eq!(
            LedgerError::AccountNotFound("acc".into()).provider_code(),
            ProviderCode::OperationNotAllowed
        );
        assert_eq!(
            LedgerError::StoreUnavailable("down".into()).provider_code(),
            ProviderCode::TechnicalError
        );
    }

    #[test]
    fn test_only_store_failures_are_retryable() {
        assert!(LedgerError::StoreUnavailable("timeout".into()).is_retryable());
        assert!(!LedgerError::CorruptRecord("bad json".into()).is_retryable());
        assert!(!LedgerError::AccountNotFound("acc".into()).is_retryable());
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        let error: LedgerError = sqlx::Error::PoolTimedOut.into();
        assert!(error.is_retryable());

        let error: LedgerError = sqlx::Error::RowNotFound.into();
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_claim_limit_service_error() {
        let error = LedgerError::ClaimLimitExceeded {
            period: LimitPeriod::Weekly,
            remaining: dec!(3),
        }
        .to_service_error();
        assert_eq!(error.code, "LEDGER_CLAIM_LIMIT_EXCEEDED");
        assert_eq!(error.category, ErrorCategory::Ledger);
        assert!(error.message.contains("weekly"));
    }
}
