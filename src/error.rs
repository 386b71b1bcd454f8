//! Comprehensive error handling for Chikwama backend
//!
//! This module provides a unified error system with proper HTTP status mapping,
//! user-friendly messages, and structured error codes for client handling.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wallet-specific error codes for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "INSUFFICIENT_BALANCE")]
    InsufficientBalance,
    #[serde(rename = "INVALID_AMOUNT")]
    InvalidAmount,
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,
    #[serde(rename = "USER_NOT_FOUND")]
    UserNotFound,
    #[serde(rename = "DUPLICATE_TRANSACTION")]
    DuplicateTransaction,
    #[serde(rename = "INVALID_STATUS_TRANSITION")]
    InvalidStatusTransition,
    #[serde(rename = "ACCOUNT_SUSPENDED")]
    AccountSuspended,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CACHE_ERROR")]
    CacheError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Balance cannot cover the requested amount plus fee
    InsufficientBalance { available: String, required: String },
    /// Amount is invalid (negative, zero, or out of range)
    InvalidAmount { amount: String, reason: String },
    /// Transaction with the given reference doesn't exist
    TransactionNotFound { tx_ref: String },
    /// User doesn't exist in the system
    UserNotFound { user_id: String },
    /// A live transaction already carries this reference
    DuplicateTransaction { tx_ref: String },
    /// Transaction is in a terminal state that forbids the requested change
    InvalidStatusTransition {
        tx_ref: String,
        from: String,
        to: String,
    },
    /// User account is suspended and cannot move funds out
    AccountSuspended { user_id: String },
}

/// Infrastructure-level errors (database, cache, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Redis cache unavailable
    Cache { message: String },
    /// Missing or invalid configuration
    Configuration { message: String },
}

/// External service errors (payment gateway)
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Payment gateway (PayChangu) error
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    /// Rate limit exceeded
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    /// External service timeout
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Unsupported or invalid currency
    InvalidCurrency { currency: String, reason: String },
    /// Invalid amount (format or value)
    InvalidAmount { amount: String, reason: String },
    /// Required field missing
    MissingField { field: String },
    /// Field value fails a format or ownership check
    InvalidField { field: String, reason: String },
    /// Field value out of acceptable range
    OutOfRange {
        field: String,
        min: Option<String>,
        max: Option<String>,
    },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientBalance { .. } => 422, // Unprocessable Entity
                DomainError::InvalidAmount { .. } => 400,
                DomainError::TransactionNotFound { .. } => 404,
                DomainError::UserNotFound { .. } => 404,
                DomainError::DuplicateTransaction { .. } => 409, // Conflict
                DomainError::InvalidStatusTransition { .. } => 409,
                DomainError::AccountSuspended { .. } => 403,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => 500,
                InfrastructureError::Cache { .. } => 500,
                InfrastructureError::Configuration { .. } => 500,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502, // Bad Gateway
                ExternalError::RateLimit { .. } => 429,       // Too Many Requests
                ExternalError::Timeout { .. } => 504,         // Gateway Timeout
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidCurrency { .. } => 400,
                ValidationError::InvalidAmount { .. } => 400,
                ValidationError::MissingField { .. } => 400,
                ValidationError::InvalidField { .. } => 400,
                ValidationError::OutOfRange { .. } => 400,
            },
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
                DomainError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
                DomainError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
                DomainError::UserNotFound { .. } => ErrorCode::UserNotFound,
                DomainError::DuplicateTransaction { .. } => ErrorCode::DuplicateTransaction,
                DomainError::InvalidStatusTransition { .. } => ErrorCode::InvalidStatusTransition,
                DomainError::AccountSuspended { .. } => ErrorCode::AccountSuspended,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Cache { .. } => ErrorCode::CacheError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientBalance {
                    available,
                    required,
                } => {
                    format!(
                        "Insufficient wallet balance. Available: {}, Required: {}",
                        available, required
                    )
                }
                DomainError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                DomainError::TransactionNotFound { tx_ref } => {
                    format!("Transaction '{}' not found", tx_ref)
                }
                DomainError::UserNotFound { user_id } => {
                    format!("User '{}' not found", user_id)
                }
                DomainError::DuplicateTransaction { tx_ref } => {
                    format!("Transaction '{}' has already been processed", tx_ref)
                }
                DomainError::InvalidStatusTransition { tx_ref, from, to } => {
                    format!(
                        "Transaction '{}' cannot move from '{}' to '{}'",
                        tx_ref, from, to
                    )
                }
                DomainError::AccountSuspended { user_id } => {
                    format!(
                        "Account '{}' is suspended. Please contact support",
                        user_id
                    )
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => {
                    if let Some(secs) = retry_after {
                        format!(
                            "Rate limit exceeded for {}. Please try again in {} seconds",
                            service, secs
                        )
                    } else {
                        format!(
                            "Rate limit exceeded for {}. Please try again later",
                            service
                        )
                    }
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => {
                    format!(
                        "{} request timed out after {} seconds. Please try again",
                        service, timeout_secs
                    )
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidCurrency { currency, reason } => {
                    format!("Invalid currency '{}': {}", currency, reason)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
                ValidationError::OutOfRange { field, min, max } => match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("Field '{}' must be between {} and {}", field, min, max)
                    }
                    (Some(min), None) => {
                        format!("Field '{}' must be at least {}", field, min)
                    }
                    (None, Some(max)) => {
                        format!("Field '{}' must be at most {}", field, max)
                    }
                    (None, None) => {
                        format!("Field '{}' is out of acceptable range", field)
                    }
                },
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Cache { .. } => true,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::RateLimit { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// Conversions from specific error types
// Note: From<DatabaseError> is implemented in database/error.rs to avoid circular dependency

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_balance_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::InsufficientBalance {
            available: "1020.00".to_string(),
            required: "1025.00".to_string(),
        }));

        assert_eq!(error.status_code(), 422);
        assert_eq!(error.error_code(), ErrorCode::InsufficientBalance);
        assert!(error.user_message().contains("Insufficient wallet balance"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_duplicate_transaction_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::DuplicateTransaction {
            tx_ref: "TX_1".to_string(),
        }));

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::DuplicateTransaction);
        assert!(error.user_message().contains("already been processed"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_invalid_status_transition_error() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::InvalidStatusTransition {
            tx_ref: "TX_9".to_string(),
            from: "failed".to_string(),
            to: "completed".to_string(),
        }));

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::InvalidStatusTransition);
        assert!(error.user_message().contains("cannot move"));
    }

    #[test]
    fn test_rate_limit_error() {
        let error = AppError::new(AppErrorKind::External(ExternalError::RateLimit {
            service: "PayChangu".to_string(),
            retry_after: Some(60),
        }));

        assert_eq!(error.status_code(), 429);
        assert_eq!(error.error_code(), ErrorCode::RateLimitError);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount cannot be negative".to_string(),
        }));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(!error.is_retryable());
    }
}
