//! Database error classification
//!
//! Wraps `sqlx::Error` into a small set of kinds the service layer can act
//! on. Unique-constraint violations get their own kind: the ledger treats a
//! 23505 on a transaction insert as "this reference was already applied".

use std::fmt;

use crate::error::{AppError, AppErrorKind, InfrastructureError};

/// SQLSTATE class 23 codes the service distinguishes
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

#[derive(Debug)]
pub enum DatabaseErrorKind {
    /// A unique index rejected the write (duplicate key)
    UniqueViolation { constraint: Option<String> },
    /// A referenced row does not exist
    ForeignKeyViolation { constraint: Option<String> },
    /// Query expected a row and found none
    NotFound,
    /// Pool exhausted or the connection dropped
    ConnectionFailure { message: String },
    /// Acquiring a connection timed out
    Timeout,
    /// Everything else
    Unknown { message: String },
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    /// Classify a raw sqlx error
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound,
            sqlx::Error::PoolTimedOut => DatabaseErrorKind::Timeout,
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseErrorKind::ConnectionFailure {
                    message: err.to_string(),
                }
            }
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some(UNIQUE_VIOLATION) => DatabaseErrorKind::UniqueViolation {
                    constraint: db.constraint().map(|c| c.to_string()),
                },
                Some(FOREIGN_KEY_VIOLATION) => DatabaseErrorKind::ForeignKeyViolation {
                    constraint: db.constraint().map(|c| c.to_string()),
                },
                _ => DatabaseErrorKind::Unknown {
                    message: db.message().to_string(),
                },
            },
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };

        Self { kind }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::NotFound)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::ConnectionFailure { .. } | DatabaseErrorKind::Timeout
        )
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DatabaseErrorKind::UniqueViolation { constraint } => match constraint {
                Some(name) => write!(f, "Unique constraint '{}' violated", name),
                None => write!(f, "Unique constraint violated"),
            },
            DatabaseErrorKind::ForeignKeyViolation { constraint } => match constraint {
                Some(name) => write!(f, "Foreign key constraint '{}' violated", name),
                None => write!(f, "Foreign key constraint violated"),
            },
            DatabaseErrorKind::NotFound => write!(f, "Row not found"),
            DatabaseErrorKind::ConnectionFailure { message } => {
                write!(f, "Database connection failure: {}", message)
            }
            DatabaseErrorKind::Timeout => write!(f, "Timed out acquiring a database connection"),
            DatabaseErrorKind::Unknown { message } => write!(f, "Database error: {}", message),
        }
    }
}

impl std::error::Error for DatabaseError {}

// Fallback conversion for callers that don't inspect the kind. The ledger
// matches `is_unique_violation` before this runs, so duplicates never
// surface as infrastructure errors from there.
impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        let is_retryable = err.is_retryable();
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: err.to_string(),
            is_retryable,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violation_detection() {
        let err = DatabaseError::new(DatabaseErrorKind::UniqueViolation {
            constraint: Some("transactions_live_tx_ref_key".to_string()),
        });

        assert!(err.is_unique_violation());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("transactions_live_tx_ref_key"));
    }

    #[test]
    fn test_connection_failure_is_retryable() {
        let err = DatabaseError::new(DatabaseErrorKind::ConnectionFailure {
            message: "broken pipe".to_string(),
        });

        assert!(err.is_retryable());

        let app_err: AppError = err.into();
        assert_eq!(app_err.status_code(), 500);
        assert!(app_err.is_retryable());
    }

    #[test]
    fn test_not_found_classification() {
        let err = DatabaseError::from_sqlx(sqlx::Error::RowNotFound);
        assert!(err.is_not_found());
    }
}
