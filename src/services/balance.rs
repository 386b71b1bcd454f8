//! Cached wallet balance and history reads
//!
//! Read path only. Writes happen in the ledger, which invalidates these
//! keys after every mutation.

use crate::cache::keys::wallet::{BalanceKey, TransactionsKey};
use crate::cache::RedisCache;
use crate::database::transaction_repository::{TransactionRepository, WalletTransaction};
use crate::database::user_repository::UserRepository;
use crate::error::{AppError, AppErrorKind, DomainError};
use bigdecimal::RoundingMode;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const BALANCE_CACHE_TTL: Duration = Duration::from_secs(30);
const HISTORY_CACHE_TTL: Duration = Duration::from_secs(30);
const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletBalance {
    pub user_id: String,
    pub balance: String,
    pub currency: String,
    pub last_updated: String,
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionView {
    pub id: String,
    pub tx_type: String,
    pub amount: String,
    pub fee: String,
    pub tx_ref: String,
    pub status: String,
    pub currency: String,
    pub error_message: Option<String>,
    pub created_at: String,
}

impl From<&WalletTransaction> for TransactionView {
    fn from(row: &WalletTransaction) -> Self {
        Self {
            id: row.id.to_string(),
            tx_type: row.tx_type.clone(),
            amount: row
                .amount
                .with_scale_round(2, RoundingMode::HalfUp)
                .to_string(),
            fee: row.fee.with_scale_round(2, RoundingMode::HalfUp).to_string(),
            tx_ref: row.tx_ref.clone(),
            status: row.status.clone(),
            currency: row.currency.clone(),
            error_message: row.error_message.clone(),
            created_at: row.created_at.to_rfc3339(),
        }
    }
}

pub struct BalanceService {
    users: UserRepository,
    transactions: TransactionRepository,
    cache: Option<RedisCache>,
    currency: String,
}

impl BalanceService {
    pub fn new(pool: PgPool, currency: impl Into<String>, cache: Option<RedisCache>) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            transactions: TransactionRepository::new(pool),
            cache,
            currency: currency.into(),
        }
    }

    pub async fn get_balance(
        &self,
        user_id: Uuid,
        force_refresh: bool,
    ) -> Result<WalletBalance, AppError> {
        let key = BalanceKey::new(user_id.to_string()).to_string();

        if !force_refresh {
            if let Some(cache) = &self.cache {
                if let Ok(Some(mut cached)) = cache.get::<WalletBalance>(&key).await {
                    debug!(user_id = %user_id, "balance cache hit");
                    cached.cached = true;
                    return Ok(cached);
                }
            }
        }

        debug!(user_id = %user_id, "fetching balance from database");
        let balance = self
            .users
            .get_balance(user_id)
            .await
            .map_err(AppError::from)?
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::UserNotFound {
                    user_id: user_id.to_string(),
                }))
            })?;

        let view = WalletBalance {
            user_id: user_id.to_string(),
            balance: balance
                .with_scale_round(2, RoundingMode::HalfUp)
                .to_string(),
            currency: self.currency.clone(),
            last_updated: Utc::now().to_rfc3339(),
            cached: false,
        };

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(&key, &view, Some(BALANCE_CACHE_TTL)).await {
                warn!(user_id = %user_id, error = %e, "failed to cache balance");
            }
        }

        Ok(view)
    }

    /// Transaction history, newest first. Only the default page size is
    /// cached; bespoke limits always hit the database.
    pub async fn get_transactions(
        &self,
        user_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<TransactionView>, AppError> {
        let limit = effective_limit(limit);
        let cacheable = limit == DEFAULT_HISTORY_LIMIT;
        let key = TransactionsKey::new(user_id.to_string()).to_string();

        if cacheable {
            if let Some(cache) = &self.cache {
                if let Ok(Some(cached)) = cache.get::<Vec<TransactionView>>(&key).await {
                    debug!(user_id = %user_id, "history cache hit");
                    return Ok(cached);
                }
            }
        }

        let rows = self
            .transactions
            .find_by_user(user_id, limit)
            .await
            .map_err(AppError::from)?;
        let views: Vec<TransactionView> = rows.iter().map(TransactionView::from).collect();

        if cacheable {
            if let Some(cache) = &self.cache {
                if let Err(e) = cache.set(&key, &views, Some(HISTORY_CACHE_TTL)).await {
                    warn!(user_id = %user_id, error = %e, "failed to cache history");
                }
            }
        }

        Ok(views)
    }
}

fn effective_limit(limit: Option<i64>) -> i64 {
    limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}
