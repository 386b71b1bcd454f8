//! Wallet ledger: the only code path that moves money
//!
//! Every balance mutation runs inside a single database transaction with
//! the affected rows locked, and every deposit insert goes through the
//! partial unique index on live tx_refs. A unique violation there is the
//! idempotent-duplicate signal, not a failure.

use crate::cache::keys::wallet::{BalanceKey, TransactionsKey};
use crate::cache::RedisCache;
use crate::config::WalletConfig;
use crate::database::error::DatabaseError;
use crate::database::transaction_repository::{
    TransactionRepository, TransactionStatus, TransactionType, WalletTransaction,
};
use crate::database::user_repository::{User, UserRepository};
use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};
use crate::payments::generate_tx_ref;
use bigdecimal::{BigDecimal, RoundingMode};
use serde::Serialize;
use sqlx::PgPool;
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

/// Percentage fees parsed once at startup
#[derive(Debug, Clone)]
pub struct FeePolicy {
    deposit_percent: BigDecimal,
    withdrawal_percent: BigDecimal,
}

impl FeePolicy {
    pub fn from_config(config: &WalletConfig) -> Result<Self, AppError> {
        Ok(Self {
            deposit_percent: parse_percent(&config.deposit_fee_percent)?,
            withdrawal_percent: parse_percent(&config.withdrawal_fee_percent)?,
        })
    }

    fn percent_for(&self, tx_type: TransactionType) -> BigDecimal {
        match tx_type {
            TransactionType::Deposit => self.deposit_percent.clone(),
            TransactionType::Withdrawal => self.withdrawal_percent.clone(),
            // internal credits from bet settlement carry no gateway fee
            TransactionType::Winnings => BigDecimal::from(0),
        }
    }
}

fn parse_percent(raw: &str) -> Result<BigDecimal, AppError> {
    BigDecimal::from_str(raw.trim()).map_err(|_| {
        AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: format!("invalid fee percent '{}'", raw),
            },
        ))
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct DepositReceipt {
    pub tx_ref: String,
    pub user_id: Uuid,
    pub gross: String,
    pub fee: String,
    pub credited: String,
    pub balance: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalReceipt {
    pub tx_ref: String,
    pub user_id: Uuid,
    pub requested: String,
    pub fee: String,
    pub total_debited: String,
    pub balance: String,
}

/// Outcome of completing a withdrawal against a gateway confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionOutcome {
    Completed,
    AlreadyCompleted,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub reversed: usize,
}

pub struct LedgerService {
    pool: PgPool,
    users: UserRepository,
    transactions: TransactionRepository,
    cache: Option<RedisCache>,
    fees: FeePolicy,
    currency: String,
    stuck_withdrawal_hours: i32,
}

impl LedgerService {
    pub fn new(
        pool: PgPool,
        config: &WalletConfig,
        cache: Option<RedisCache>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            users: UserRepository::new(pool.clone()),
            transactions: TransactionRepository::new(pool.clone()),
            cache,
            fees: FeePolicy::from_config(config)?,
            currency: config.currency.clone(),
            stuck_withdrawal_hours: config.stuck_withdrawal_hours,
            pool,
        })
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Parse a caller-supplied amount, requiring a positive decimal
    pub fn parse_amount(raw: &str) -> Result<BigDecimal, AppError> {
        let amount = BigDecimal::from_str(raw.trim()).map_err(|_| {
            domain(DomainError::InvalidAmount {
                amount: raw.to_string(),
                reason: "not a decimal number".to_string(),
            })
        })?;
        if amount <= BigDecimal::from(0) {
            return Err(domain(DomainError::InvalidAmount {
                amount: raw.to_string(),
                reason: "must be greater than zero".to_string(),
            }));
        }
        Ok(amount)
    }

    /// Fee for a movement, scaled to 2 decimal places, half-up
    pub fn calculate_fee(&self, amount: &BigDecimal, tx_type: TransactionType) -> BigDecimal {
        let percent = self.fees.percent_for(tx_type);
        ((amount * percent) / BigDecimal::from(100)).with_scale_round(2, RoundingMode::HalfUp)
    }

    /// Credit a confirmed gateway deposit.
    ///
    /// Inserts the `completed` deposit row and credits `gross - fee` in one
    /// transaction. A unique violation on the tx_ref index means the
    /// deposit was already applied and surfaces as `DuplicateTransaction`
    /// with no audit row. Suspended accounts still receive deposits; only
    /// outbound movement is blocked.
    pub async fn process_deposit(
        &self,
        user_id: Uuid,
        gross: BigDecimal,
        tx_ref: &str,
        payload: &serde_json::Value,
    ) -> Result<DepositReceipt, AppError> {
        if gross <= BigDecimal::from(0) {
            return Err(domain(DomainError::InvalidAmount {
                amount: gross.to_string(),
                reason: "deposit must be greater than zero".to_string(),
            }));
        }

        let user = self
            .users
            .find_by_id(user_id)
            .await
            .map_err(AppError::from)?
            .ok_or_else(|| {
                domain(DomainError::UserNotFound {
                    user_id: user_id.to_string(),
                })
            })?;

        let fee = self.calculate_fee(&gross, TransactionType::Deposit);
        let credited = (&gross - &fee).with_scale_round(2, RoundingMode::HalfUp);

        match self
            .apply_deposit(user.id, &gross, &fee, &credited, tx_ref, payload)
            .await
        {
            Ok(balance) => {
                self.invalidate_user_cache(user.id).await;
                info!(
                    tx_ref = %tx_ref,
                    user_id = %user.id,
                    credited = %credited,
                    "deposit applied"
                );
                Ok(DepositReceipt {
                    tx_ref: tx_ref.to_string(),
                    user_id: user.id,
                    gross: money(&gross),
                    fee: money(&fee),
                    credited: money(&credited),
                    balance: money(&balance),
                })
            }
            Err(err) => {
                if !matches!(
                    err.kind,
                    AppErrorKind::Domain(DomainError::DuplicateTransaction { .. })
                ) {
                    if let Err(audit_err) = self
                        .transactions
                        .record_failed(
                            user.id,
                            TransactionType::Deposit,
                            gross.clone(),
                            fee.clone(),
                            tx_ref,
                            &self.currency,
                            &err.to_string(),
                        )
                        .await
                    {
                        warn!(
                            tx_ref = %tx_ref,
                            error = %audit_err,
                            "could not record failed deposit"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    async fn apply_deposit(
        &self,
        user_id: Uuid,
        gross: &BigDecimal,
        fee: &BigDecimal,
        credited: &BigDecimal,
        tx_ref: &str,
        payload: &serde_json::Value,
    ) -> Result<BigDecimal, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "INSERT INTO transactions
             (user_id, tx_type, amount, fee, tx_ref, status, currency, metadata)
             VALUES ($1, 'deposit', $2, $3, $4, 'completed', $5, $6)",
        )
        .bind(user_id)
        .bind(gross)
        .bind(fee)
        .bind(tx_ref)
        .bind(&self.currency)
        .bind(payload)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            let db = DatabaseError::from_sqlx(e);
            if db.is_unique_violation() {
                domain(DomainError::DuplicateTransaction {
                    tx_ref: tx_ref.to_string(),
                })
            } else {
                AppError::from(db)
            }
        })?;

        let balance = sqlx::query_scalar::<_, BigDecimal>(
            "UPDATE users
             SET balance = balance + $2, updated_at = NOW()
             WHERE id = $1
             RETURNING balance",
        )
        .bind(user_id)
        .bind(credited)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(balance)
    }

    /// Reserve funds for a withdrawal before any gateway call is made.
    ///
    /// Locks the user row, requires an active account with balance covering
    /// `requested + fee`, inserts the `pending` withdrawal and debits the
    /// total. The debit is the reservation: if the payout later fails, the
    /// reversal refunds it.
    pub async fn process_withdrawal(
        &self,
        user_id: Uuid,
        requested: BigDecimal,
    ) -> Result<WithdrawalReceipt, AppError> {
        if requested <= BigDecimal::from(0) {
            return Err(domain(DomainError::InvalidAmount {
                amount: requested.to_string(),
                reason: "withdrawal must be greater than zero".to_string(),
            }));
        }

        let fee = self.calculate_fee(&requested, TransactionType::Withdrawal);
        let total = (&requested + &fee).with_scale_round(2, RoundingMode::HalfUp);
        let tx_ref = generate_tx_ref("TX");

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, first_name, last_name, balance, status, created_at, updated_at
             FROM users
             WHERE id = $1
             FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| {
            domain(DomainError::UserNotFound {
                user_id: user_id.to_string(),
            })
        })?;

        if !user.is_active() {
            return Err(domain(DomainError::AccountSuspended {
                user_id: user_id.to_string(),
            }));
        }

        if user.balance < total {
            return Err(domain(DomainError::InsufficientBalance {
                available: money(&user.balance),
                required: money(&total),
            }));
        }

        sqlx::query(
            "INSERT INTO transactions
             (user_id, tx_type, amount, fee, tx_ref, status, currency, metadata)
             VALUES ($1, 'withdrawal', $2, $3, $4, 'pending', $5, '{}'::jsonb)",
        )
        .bind(user_id)
        .bind(&requested)
        .bind(&fee)
        .bind(&tx_ref)
        .bind(&self.currency)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let balance = sqlx::query_scalar::<_, BigDecimal>(
            "UPDATE users
             SET balance = balance - $2, updated_at = NOW()
             WHERE id = $1
             RETURNING balance",
        )
        .bind(user_id)
        .bind(&total)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        self.invalidate_user_cache(user_id).await;
        info!(
            tx_ref = %tx_ref,
            user_id = %user_id,
            total = %total,
            "withdrawal reserved"
        );

        Ok(WithdrawalReceipt {
            tx_ref,
            user_id,
            requested: money(&requested),
            fee: money(&fee),
            total_debited: money(&total),
            balance: money(&balance),
        })
    }

    /// Settle a pending withdrawal after the gateway confirms the payout.
    ///
    /// The gateway payload is merged into the row's metadata. A withdrawal
    /// that is already completed is an idempotent success; a failed one
    /// cannot come back.
    pub async fn complete_withdrawal(
        &self,
        tx_ref: &str,
        payload: &serde_json::Value,
    ) -> Result<CompletionOutcome, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let row = self.lock_withdrawal(&mut tx, tx_ref).await?;

        match row.status() {
            Some(TransactionStatus::Completed) => Ok(CompletionOutcome::AlreadyCompleted),
            Some(TransactionStatus::Pending) => {
                sqlx::query(
                    "UPDATE transactions
                     SET status = 'completed', metadata = metadata || $2, updated_at = NOW()
                     WHERE id = $1",
                )
                .bind(row.id)
                .bind(payload)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

                tx.commit().await.map_err(db_err)?;
                info!(tx_ref = %tx_ref, user_id = %row.user_id, "withdrawal completed");
                Ok(CompletionOutcome::Completed)
            }
            _ => Err(domain(DomainError::InvalidStatusTransition {
                tx_ref: tx_ref.to_string(),
                from: row.status.clone(),
                to: "completed".to_string(),
            })),
        }
    }

    /// Compensate a withdrawal that will never settle.
    ///
    /// The stored row is authoritative for the refund: `row.amount +
    /// row.fee` goes back to the row's user, whatever the caller passed.
    /// Reversing an already-failed withdrawal is a no-op; a completed
    /// payout cannot be reversed here.
    pub async fn reverse_withdrawal(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        tx_ref: &str,
        reason: &str,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let row = self.lock_withdrawal(&mut tx, tx_ref).await?;

        match row.status() {
            Some(TransactionStatus::Failed) => Ok(()),
            Some(TransactionStatus::Pending) => {
                if row.user_id != user_id {
                    warn!(
                        tx_ref = %tx_ref,
                        caller_user = %user_id,
                        stored_user = %row.user_id,
                        "reversal user mismatch, refunding the stored row's user"
                    );
                }
                if &row.amount != amount {
                    warn!(
                        tx_ref = %tx_ref,
                        caller_amount = %amount,
                        stored_amount = %row.amount,
                        "reversal amount mismatch, refunding the stored amounts"
                    );
                }
                let refund = (&row.amount + &row.fee).with_scale_round(2, RoundingMode::HalfUp);

                sqlx::query(
                    "UPDATE transactions
                     SET status = 'failed', error_message = $2, updated_at = NOW()
                     WHERE id = $1",
                )
                .bind(row.id)
                .bind(reason)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

                sqlx::query(
                    "UPDATE users
                     SET balance = balance + $2, updated_at = NOW()
                     WHERE id = $1",
                )
                .bind(row.user_id)
                .bind(&refund)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

                tx.commit().await.map_err(db_err)?;
                self.invalidate_user_cache(row.user_id).await;
                info!(
                    tx_ref = %tx_ref,
                    user_id = %row.user_id,
                    refund = %refund,
                    reason = reason,
                    "withdrawal reversed"
                );
                Ok(())
            }
            _ => Err(domain(DomainError::InvalidStatusTransition {
                tx_ref: tx_ref.to_string(),
                from: row.status.clone(),
                to: "failed".to_string(),
            })),
        }
    }

    /// Reverse every withdrawal stuck `pending` past the recovery window.
    ///
    /// Runs on demand. A withdrawal that settles between the scan and its
    /// reversal is skipped.
    pub async fn sweep_stuck_withdrawals(&self) -> Result<SweepReport, AppError> {
        let stuck = self
            .transactions
            .find_stuck_withdrawals(self.stuck_withdrawal_hours)
            .await
            .map_err(AppError::from)?;
        let examined = stuck.len();
        let mut reversed = 0;

        for row in stuck {
            match self
                .reverse_withdrawal(
                    row.user_id,
                    &row.amount,
                    &row.tx_ref,
                    "withdrawal stuck pending past the recovery window",
                )
                .await
            {
                Ok(()) => reversed += 1,
                Err(e) => {
                    warn!(
                        tx_ref = %row.tx_ref,
                        error = %e,
                        "stuck withdrawal not reversed"
                    );
                }
            }
        }

        if reversed > 0 {
            info!(examined, reversed, "stuck withdrawal sweep complete");
        }
        Ok(SweepReport { examined, reversed })
    }

    async fn lock_withdrawal(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        tx_ref: &str,
    ) -> Result<WalletTransaction, AppError> {
        sqlx::query_as::<_, WalletTransaction>(
            "SELECT id, user_id, tx_type, amount, fee, tx_ref, status, currency,
                    error_message, metadata, created_at, updated_at
             FROM transactions
             WHERE tx_ref = $1 AND tx_type = 'withdrawal'
             ORDER BY created_at DESC
             LIMIT 1
             FOR UPDATE",
        )
        .bind(tx_ref)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| {
            domain(DomainError::TransactionNotFound {
                tx_ref: tx_ref.to_string(),
            })
        })
    }

    async fn invalidate_user_cache(&self, user_id: Uuid) {
        let Some(cache) = &self.cache else { return };
        for key in [
            BalanceKey::new(user_id.to_string()).to_string(),
            TransactionsKey::new(user_id.to_string()).to_string(),
        ] {
            if let Err(e) = cache.delete(&key).await {
                warn!(key = %key, error = %e, "cache invalidation failed");
            }
        }
    }
}

fn domain(err: DomainError) -> AppError {
    AppError::new(AppErrorKind::Domain(err))
}

fn db_err(e: sqlx::Error) -> AppError {
    AppError::from(DatabaseError::from_sqlx(e))
}

fn money(value: &BigDecimal) -> String {
    value
        .with_scale_round(2, RoundingMode::HalfUp)
        .to_string()
}
