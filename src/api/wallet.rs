//! Wallet endpoints: withdraw, deposit checkout, balance and history
//!
//! Business outcomes (insufficient funds, bad bank details, a declined
//! payout) come back as 200 with `success: false` so the frontend can
//! show them verbatim. Error statuses are reserved for malformed requests
//! and infrastructure failures.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bigdecimal::RoundingMode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PaychanguConfig;
use crate::database::user_repository::UserRepository;
use crate::error::{AppError, AppErrorKind};
use crate::middleware::error::{success_response, success_response_with_meta};
use crate::payments::gateway::PaymentGateway;
use crate::payments::types::{ChargeRequest, CustomerContact, EventMeta, Money, TransferRequest};
use crate::payments::utils::generate_tx_ref;
use crate::services::balance::BalanceService;
use crate::services::ledger::LedgerService;

#[derive(Clone)]
pub struct WalletState {
    pub ledger: Arc<LedgerService>,
    pub balance: Arc<BalanceService>,
    pub users: UserRepository,
    pub gateway: Arc<dyn PaymentGateway>,
    pub paychangu: PaychanguConfig,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub user_id: Uuid,
    pub amount: String,
    pub bank_uuid: String,
    pub bank_account_number: String,
    pub bank_account_name: String,
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub user_id: Uuid,
    pub amount: String,
}

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub user_id: Uuid,
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub user_id: Uuid,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct WalletActionResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// POST /api/wallet/withdraw
///
/// Reserve the funds first, then ask the gateway to pay out. A declined
/// or failed transfer reverses the reservation before responding, so the
/// wallet never stays short on a payout that did not happen.
pub async fn withdraw(
    State(state): State<WalletState>,
    Json(req): Json<WithdrawRequest>,
) -> Response {
    info!(user_id = %req.user_id, amount = %req.amount, "Withdrawal requested");

    let amount = match LedgerService::parse_amount(&req.amount) {
        Ok(amount) => amount,
        Err(e) => return business_failure(e.user_message()),
    };

    for (field, value) in [
        ("bank_uuid", &req.bank_uuid),
        ("bank_account_number", &req.bank_account_number),
        ("bank_account_name", &req.bank_account_name),
    ] {
        if value.trim().is_empty() {
            return business_failure(format!("{} is required", field));
        }
    }

    let receipt = match state
        .ledger
        .process_withdrawal(req.user_id, amount.clone())
        .await
    {
        Ok(receipt) => receipt,
        Err(e) if is_business_failure(&e) => return business_failure(e.user_message()),
        Err(e) => return e.into_response(),
    };

    let transfer = TransferRequest {
        amount: Money {
            amount: receipt.requested.clone(),
            currency: state.ledger.currency().to_string(),
        },
        tx_ref: receipt.tx_ref.clone(),
        bank_uuid: req.bank_uuid,
        bank_account_number: req.bank_account_number,
        bank_account_name: req.bank_account_name,
    };

    match state.gateway.initiate_transfer(transfer).await {
        Ok(response) => {
            info!(
                tx_ref = %receipt.tx_ref,
                transfer_status = ?response.status,
                "Withdrawal transfer initiated"
            );
            (
                StatusCode::OK,
                Json(WalletActionResponse {
                    success: true,
                    message: "Withdrawal initiated".to_string(),
                    data: serde_json::to_value(&receipt).ok(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            warn!(
                tx_ref = %receipt.tx_ref,
                error = %e,
                "Transfer failed, reversing the reservation"
            );
            let reason = format!("gateway transfer failed: {}", e);
            match state
                .ledger
                .reverse_withdrawal(req.user_id, &amount, &receipt.tx_ref, &reason)
                .await
            {
                Ok(()) => business_failure(format!(
                    "Withdrawal failed: {}. The funds have been returned to your wallet",
                    e.user_message()
                )),
                Err(reversal_err) => {
                    // Funds stay reserved until the stuck-withdrawal sweep
                    // picks the row up.
                    error!(
                        tx_ref = %receipt.tx_ref,
                        error = %reversal_err,
                        "Reversal failed after a declined transfer"
                    );
                    reversal_err.into_response()
                }
            }
        }
    }
}

/// POST /api/wallet/deposit
///
/// Creates a hosted checkout session. The money only moves when the
/// gateway confirms the charge through the webhook.
pub async fn deposit(
    State(state): State<WalletState>,
    Json(req): Json<DepositRequest>,
) -> Response {
    info!(user_id = %req.user_id, amount = %req.amount, "Deposit checkout requested");

    let amount = match LedgerService::parse_amount(&req.amount) {
        Ok(amount) => amount,
        Err(e) => return business_failure(e.user_message()),
    };

    let user = match state.users.find_by_id(req.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return business_failure(format!("User '{}' not found", req.user_id)),
        Err(e) => return AppError::from(e).into_response(),
    };

    let tx_ref = generate_tx_ref("TX");
    let charge = ChargeRequest {
        amount: Money {
            amount: amount
                .with_scale_round(2, RoundingMode::HalfUp)
                .to_string(),
            currency: state.ledger.currency().to_string(),
        },
        customer: CustomerContact {
            email: Some(user.email),
            phone: None,
            first_name: user.first_name,
            last_name: user.last_name,
        },
        tx_ref: tx_ref.clone(),
        callback_url: state.paychangu.callback_url.clone(),
        return_url: state.paychangu.return_url.clone(),
        meta: EventMeta {
            user_id: Some(user.id.to_string()),
            transaction_type: Some("Deposit".to_string()),
            amount: None,
        },
    };

    match state.gateway.initiate_payment(charge).await {
        Ok(response) => {
            info!(tx_ref = %tx_ref, "Checkout session created");
            success_response(serde_json::json!({
                "checkout_url": response.checkout_url,
                "tx_ref": response.tx_ref,
            }))
            .into_response()
        }
        Err(e) => {
            warn!(tx_ref = %tx_ref, error = %e, "Checkout initiation failed");
            AppError::from(e).into_response()
        }
    }
}

/// GET /api/wallet/balance?user_id=&refresh=
pub async fn get_balance(
    State(state): State<WalletState>,
    Query(params): Query<BalanceQuery>,
) -> Response {
    info!(user_id = %params.user_id, refresh = params.refresh, "Balance requested");

    match state
        .balance
        .get_balance(params.user_id, params.refresh)
        .await
    {
        Ok(balance) => (StatusCode::OK, Json(balance)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/wallet/transactions?user_id=&limit=
pub async fn get_transactions(
    State(state): State<WalletState>,
    Query(params): Query<TransactionsQuery>,
) -> Response {
    match state
        .balance
        .get_transactions(params.user_id, params.limit)
        .await
    {
        Ok(transactions) => {
            let count = transactions.len();
            success_response_with_meta(transactions, serde_json::json!({ "count": count }))
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// POST /api/wallet/sweep-stuck
///
/// On-demand recovery for withdrawals left pending past the configured
/// window, typically wired to a cron hitting this route.
pub async fn sweep_stuck(State(state): State<WalletState>) -> Response {
    match state.ledger.sweep_stuck_withdrawals().await {
        Ok(report) => {
            info!(
                examined = report.examined,
                reversed = report.reversed,
                "Stuck withdrawal sweep finished"
            );
            success_response(report).into_response()
        }
        Err(e) => e.into_response(),
    }
}

fn business_failure(message: impl Into<String>) -> Response {
    (
        StatusCode::OK,
        Json(WalletActionResponse {
            success: false,
            message: message.into(),
            data: None,
        }),
    )
        .into_response()
}

fn is_business_failure(err: &AppError) -> bool {
    matches!(
        err.kind,
        AppErrorKind::Domain(_) | AppErrorKind::Validation(_)
    )
}
