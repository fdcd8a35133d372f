/// Shared error types for the ledger services
///
/// - Standardized error codes for consistent error handling across services
/// - Categorized by error domain (Validation, Ledger, Network, Internal)
/// - Error codes follow pattern: <CATEGORY>_<SPECIFIC>
/// - Context field carries additional debugging information
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error categories that map to HTTP status codes and logging severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Client provided invalid input (400)
    Validation,

    /// A ledger rule rejected the operation (422)
    /// Insufficient funds, claim limits, already reversed transactions
    Ledger,

    /// Store or cache unavailable (503)
    Network,

    /// Unexpected failures, programming errors (500)
    Internal,

    /// Resource not found (404)
    NotFound,

    /// Missing or invalid identity (401)
    Unauthorized,
}

impl ErrorCategory {
    /// Map error category to HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorCategory::Validation => 400,
            ErrorCategory::Ledger => 422,
            ErrorCategory::Network => 503,
            ErrorCategory::Internal => 500,
            ErrorCategory::NotFound => 404,
            ErrorCategory::Unauthorized => 401,
        }
    }

    /// Map error category to log level
    pub fn log_level(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "warn",
            ErrorCategory::Ledger => "info",
            ErrorCategory::Network => "error",
            ErrorCategory::Internal => "error",
            ErrorCategory::NotFound => "info",
            ErrorCategory::Unauthorized => "warn",
        }
    }
}

/// Standard error codes used across all services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCode(pub &'static str);

impl ErrorCode {
    // Validation errors
    pub const VALIDATION_INVALID_AMOUNT: ErrorCode = ErrorCode("VALIDATION_INVALID_AMOUNT");
    pub const VALIDATION_INVALID_INPUT: ErrorCode = ErrorCode("VALIDATION_INVALID_INPUT");
    pub const VALIDATION_MISSING_FIELD: ErrorCode = ErrorCode("VALIDATION_MISSING_FIELD");

    // Ledger rule rejections
    pub const LEDGER_INSUFFICIENT_FUNDS: ErrorCode = ErrorCode("LEDGER_INSUFFICIENT_FUNDS");
    pub const LEDGER_TRANSACTION_NOT_FOUND: ErrorCode = ErrorCode("LEDGER_TRANSACTION_NOT_FOUND");
    pub const LEDGER_OPERATION_NOT_ALLOWED: ErrorCode = ErrorCode("LEDGER_OPERATION_NOT_ALLOWED");
    pub const LEDGER_CLAIM_EXCEEDS_AVAILABLE: ErrorCode =
        ErrorCode("LEDGER_CLAIM_EXCEEDS_AVAILABLE");
    pub const LEDGER_CLAIM_LIMIT_EXCEEDED: ErrorCode = ErrorCode("LEDGER_CLAIM_LIMIT_EXCEEDED");

    // Network errors
    pub const NETWORK_DATABASE_CONNECTION: ErrorCode = ErrorCode("NETWORK_DATABASE_CONNECTION");
    pub const NETWORK_REDIS_CONNECTION: ErrorCode = ErrorCode("NETWORK_REDIS_CONNECTION");

    // Internal errors
    pub const INTERNAL_UNEXPECTED: ErrorCode = ErrorCode("INTERNAL_UNEXPECTED");
    pub const INTERNAL_SERIALIZATION: ErrorCode = ErrorCode("INTERNAL_SERIALIZATION");
    pub const INTERNAL_DATABASE_QUERY: ErrorCode = ErrorCode("INTERNAL_DATABASE_QUERY");

    // Resource errors
    pub const NOT_FOUND_ACCOUNT: ErrorCode = ErrorCode("NOT_FOUND_ACCOUNT");
    pub const NOT_FOUND_OPERATION: ErrorCode = ErrorCode("NOT_FOUND_OPERATION");

    // Identity errors
    pub const UNAUTHORIZED_MISSING_IDENTITY: ErrorCode =
        ErrorCode("UNAUTHORIZED_MISSING_IDENTITY");

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Standardized error structure used across all services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceError {
    /// Error category (determines status code and log level)
    pub category: ErrorCategory,

    /// Structured error code
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context (field names, ids, amounts)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl ServiceError {
    pub fn new(category: ErrorCategory, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.as_str().to_string(),
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    // Validation error constructors
    pub fn invalid_amount(amount: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Validation,
            ErrorCode::VALIDATION_INVALID_AMOUNT,
            format!("Invalid amount: {}", amount),
        )
        .with_context(reason)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Validation,
            ErrorCode::VALIDATION_INVALID_INPUT,
            message,
        )
    }

    // Ledger rule constructors
    pub fn insufficient_funds(required: impl fmt::Display, available: impl fmt::Display) -> Self {
        Self::new(
            ErrorCategory::Ledger,
            ErrorCode::LEDGER_INSUFFICIENT_FUNDS,
            "Insufficient funds",
        )
        .with_context(format!("required: {}, available: {}", required, available))
    }

    pub fn transaction_not_found(transaction_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCategory::Ledger,
            ErrorCode::LEDGER_TRANSACTION_NOT_FOUND,
            format!("Transaction not found: {}", transaction_id),
        )
    }

    pub fn operation_not_allowed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Ledger,
            ErrorCode::LEDGER_OPERATION_NOT_ALLOWED,
            "Operation not allowed",
        )
        .with_context(reason)
    }

    pub fn claim_exceeds_available(requested: impl fmt::Display, available: impl fmt::Display) -> Self {
        Self::new(
            ErrorCategory::Ledger,
            ErrorCode::LEDGER_CLAIM_EXCEEDS_AVAILABLE,
            "Claim amount exceeds available cashback",
        )
        .with_context(format!("requested: {}, available: {}", requested, available))
    }

    pub fn claim_limit_exceeded(period: impl fmt::Display, remaining: impl fmt::Display) -> Self {
        Self::new(
            ErrorCategory::Ledger,
            ErrorCode::LEDGER_CLAIM_LIMIT_EXCEEDED,
            format!("Claim amount exceeds {} cashback limit", period),
        )
        .with_context(format!("remaining: {}", remaining))
    }

    // Network error constructors
    pub fn database_error(error: impl fmt::Display) -> Self {
        Self::new(
            ErrorCategory::Network,
            ErrorCode::NETWORK_DATABASE_CONNECTION,
            "Database connection error",
        )
        .with_context(error.to_string())
    }

    pub fn redis_error(error: impl fmt::Display) -> Self {
        Self::new(
            ErrorCategory::Network,
            ErrorCode::NETWORK_REDIS_CONNECTION,
            "Redis connection error",
        )
        .with_context(error.to_string())
    }

    // Resource not found constructors
    pub fn account_not_found(account_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCategory::NotFound,
            ErrorCode::NOT_FOUND_ACCOUNT,
            format!("Account not found: {}", account_id),
        )
    }

    pub fn operation_not_found(operation_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCategory::NotFound,
            ErrorCode::NOT_FOUND_OPERATION,
            format!("Operation not found: {}", operation_id),
        )
    }

    pub fn missing_identity() -> Self {
        Self::new(
            ErrorCategory::Unauthorized,
            ErrorCode::UNAUTHORIZED_MISSING_IDENTITY,
            "Missing or invalid user identity",
        )
    }

    // Internal error constructors
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Internal,
            ErrorCode::INTERNAL_UNEXPECTED,
            message,
        )
    }

    pub fn serialization_error(error: impl fmt::Display) -> Self {
        Self::new(
            ErrorCategory::Internal,
            ErrorCode::INTERNAL_SERIALIZATION,
            "Serialization error",
        )
        .with_context(error.to_string())
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(context) = &self.context {
            write!(f, "[{}] {}: {}", self.code, self.message, context)
        } else {
            write!(f, "[{}] {}", self.code, self.message)
        }
    }
}

impl std::error::Error for ServiceError {}

pub type Result<T> = std::result::Result<T, ServiceError>;
