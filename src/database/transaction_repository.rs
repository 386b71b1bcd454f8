use std::fmt;

use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

use crate::database::error::DatabaseError;

/// Ledger transaction types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Winnings,
}

impl TransactionType {
    pub fn as_db(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Winnings => "winnings",
        }
    }

    /// Case-insensitive parse, tolerant of the capitalized spellings the
    /// gateway echoes back in webhook metadata.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "deposit" => Some(TransactionType::Deposit),
            "withdrawal" | "withdraw" => Some(TransactionType::Withdrawal),
            "winnings" | "winning" => Some(TransactionType::Winnings),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db())
    }
}

/// Ledger transaction states
///
/// `pending → completed` and `pending → failed` are the only transitions;
/// both completed and failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_db(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Some(TransactionStatus::Pending),
            "completed" => Some(TransactionStatus::Completed),
            "failed" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed | TransactionStatus::Failed
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db())
    }
}

/// Wallet transaction entity
#[derive(Debug, Clone, FromRow)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tx_type: String,
    pub amount: BigDecimal,
    pub fee: BigDecimal,
    pub tx_ref: String,
    pub status: String,
    pub currency: String,
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl WalletTransaction {
    pub fn status(&self) -> Option<TransactionStatus> {
        TransactionStatus::parse(&self.status)
    }

    pub fn tx_type(&self) -> Option<TransactionType> {
        TransactionType::parse(&self.tx_type)
    }
}

/// Repository for ledger transaction reads and audit writes.
///
/// Balance-affecting writes run inside the ledger service's database
/// transactions and do not go through this type.
#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find the most recent transaction carrying an external reference
    pub async fn find_by_tx_ref(
        &self,
        tx_ref: &str,
    ) -> Result<Option<WalletTransaction>, DatabaseError> {
        sqlx::query_as::<_, WalletTransaction>(
            "SELECT id, user_id, tx_type, amount, fee, tx_ref, status, currency,
                    error_message, metadata, created_at, updated_at
             FROM transactions
             WHERE tx_ref = $1
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(tx_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Transaction history for a user, newest first
    pub async fn find_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<WalletTransaction>, DatabaseError> {
        sqlx::query_as::<_, WalletTransaction>(
            "SELECT id, user_id, tx_type, amount, fee, tx_ref, status, currency,
                    error_message, metadata, created_at, updated_at
             FROM transactions
             WHERE user_id = $1
             ORDER BY created_at DESC
             LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Record a failed transaction for audit purposes.
    ///
    /// Failed rows sit outside the partial unique index on tx_ref, so this
    /// never conflicts with a later retry of the same reference.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_failed(
        &self,
        user_id: Uuid,
        tx_type: TransactionType,
        amount: BigDecimal,
        fee: BigDecimal,
        tx_ref: &str,
        currency: &str,
        error_message: &str,
    ) -> Result<WalletTransaction, DatabaseError> {
        sqlx::query_as::<_, WalletTransaction>(
            "INSERT INTO transactions
             (user_id, tx_type, amount, fee, tx_ref, status, currency, error_message, metadata)
             VALUES ($1, $2, $3, $4, $5, 'failed', $6, $7, '{}'::jsonb)
             RETURNING id, user_id, tx_type, amount, fee, tx_ref, status, currency,
                       error_message, metadata, created_at, updated_at",
        )
        .bind(user_id)
        .bind(tx_type.as_db())
        .bind(amount)
        .bind(fee)
        .bind(tx_ref)
        .bind(currency)
        .bind(error_message)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Withdrawals still pending after the given number of hours, oldest
    /// first. These are the candidates for the stuck-withdrawal sweep.
    pub async fn find_stuck_withdrawals(
        &self,
        older_than_hours: i32,
    ) -> Result<Vec<WalletTransaction>, DatabaseError> {
        sqlx::query_as::<_, WalletTransaction>(
            "SELECT id, user_id, tx_type, amount, fee, tx_ref, status, currency,
                    error_message, metadata, created_at, updated_at
             FROM transactions
             WHERE tx_type = 'withdrawal'
               AND status = 'pending'
               AND created_at < NOW() - INTERVAL '1 hour' * $1
             ORDER BY created_at ASC",
        )
        .bind(older_than_hours)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_type_parse() {
        assert_eq!(
            TransactionType::parse("Deposit"),
            Some(TransactionType::Deposit)
        );
        assert_eq!(
            TransactionType::parse("withdrawal"),
            Some(TransactionType::Withdrawal)
        );
        assert_eq!(
            TransactionType::parse(" Withdraw "),
            Some(TransactionType::Withdrawal)
        );
        assert_eq!(
            TransactionType::parse("WINNINGS"),
            Some(TransactionType::Winnings)
        );
        assert_eq!(TransactionType::parse("refund"), None);
    }

    #[test]
    fn test_status_terminality() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Completed.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
    }

    #[test]
    fn test_db_round_trip_spellings() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Completed,
            TransactionStatus::Failed,
        ] {
            assert_eq!(TransactionStatus::parse(status.as_db()), Some(status));
        }

        for tx_type in [
            TransactionType::Deposit,
            TransactionType::Withdrawal,
            TransactionType::Winnings,
        ] {
            assert_eq!(TransactionType::parse(tx_type.as_db()), Some(tx_type));
        }
    }
}
