//! PayChangu webhook and callback endpoints
//!
//! The gateway delivers the same notification through three doors: the
//! signed server-to-server webhook, a POST callback carrying an identical
//! signed body, and a browser GET redirect that only names a tx_ref. All
//! of them funnel into the webhook processor.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::services::webhook_processor::{WebhookOutcome, WebhookProcessor, WebhookProcessorError};

/// Header names PayChangu has used for the webhook signature across
/// dashboard versions. Lookups are case-insensitive.
const SIGNATURE_HEADERS: [&str; 3] = ["signature", "x-signature", "x-paychangu-signature"];

pub struct WebhookState {
    pub processor: Arc<WebhookProcessor>,
    pub wallet_page_url: String,
}

#[derive(Debug, Deserialize)]
pub struct RedirectParams {
    pub tx_ref: Option<String>,
    pub status: Option<String>,
}

/// POST /api/paychangu/webhook and POST /api/paychangu/callback
pub async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> Response {
    info!(bytes = body.len(), "Received webhook");

    let signature = SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()));

    match state.processor.process_webhook(&body, signature).await {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => error_response(e),
    }
}

/// GET /api/paychangu/webhook
///
/// PayChangu sends the customer's browser here after checkout. Forward
/// them to the wallet page with whatever the gateway attached; with no
/// params this doubles as a liveness probe for dashboard configuration.
pub async fn webhook_redirect(
    State(state): State<Arc<WebhookState>>,
    Query(params): Query<RedirectParams>,
) -> Response {
    if params.tx_ref.is_none() && params.status.is_none() {
        return Json(serde_json::json!({
            "status": "ok",
            "endpoint": "paychangu webhook"
        }))
        .into_response();
    }

    let mut url = state.wallet_page_url.clone();
    let mut sep = if url.contains('?') { '&' } else { '?' };
    if let Some(tx_ref) = &params.tx_ref {
        url.push(sep);
        url.push_str("tx_ref=");
        url.push_str(&query_safe(tx_ref));
        sep = '&';
    }
    if let Some(status) = &params.status {
        url.push(sep);
        url.push_str("status=");
        url.push_str(&query_safe(status));
    }

    info!(location = %url, "Redirecting checkout return to wallet page");
    Redirect::to(&url).into_response()
}

/// GET /api/paychangu/callback
///
/// The query string is attacker-visible, so the state it claims is never
/// trusted: the processor verifies the tx_ref server-side before any
/// ledger work.
pub async fn handle_callback(
    State(state): State<Arc<WebhookState>>,
    Query(params): Query<RedirectParams>,
) -> Response {
    let Some(tx_ref) = params.tx_ref.as_deref().filter(|t| !t.trim().is_empty()) else {
        warn!("Callback without tx_ref");
        return (StatusCode::BAD_REQUEST, "tx_ref is required").into_response();
    };

    info!(tx_ref = %tx_ref, claimed_status = ?params.status, "Received payment callback");

    match state.processor.process_callback(tx_ref).await {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => error_response(e),
    }
}

fn outcome_response(outcome: WebhookOutcome) -> Response {
    let (message, tx_ref) = match outcome {
        WebhookOutcome::Applied { tx_ref, message } => {
            info!(tx_ref = %tx_ref, "Webhook applied to ledger");
            (message, tx_ref)
        }
        WebhookOutcome::AlreadyProcessed { tx_ref } => {
            info!(tx_ref = %tx_ref, "Webhook duplicate acknowledged");
            ("Transaction already processed".to_string(), tx_ref)
        }
        WebhookOutcome::Ignored { tx_ref, status } => {
            info!(tx_ref = %tx_ref, status = %status, "Webhook acknowledged without processing");
            (format!("Ignored event with status '{}'", status), tx_ref)
        }
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "message": message,
            "tx_ref": tx_ref,
        })),
    )
        .into_response()
}

fn error_response(err: WebhookProcessorError) -> Response {
    let status = match &err {
        WebhookProcessorError::MissingSignature | WebhookProcessorError::InvalidSignature => {
            StatusCode::UNAUTHORIZED
        }
        WebhookProcessorError::InvalidPayload(_) | WebhookProcessorError::Undeliverable(_) => {
            StatusCode::BAD_REQUEST
        }
        WebhookProcessorError::DatabaseError(_) | WebhookProcessorError::ProcessingError(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    if status.is_server_error() {
        // 5xx makes the gateway redeliver later
        error!(error = %err, "Webhook processing failed");
    } else {
        warn!(error = %err, status = status.as_u16(), "Webhook rejected");
    }

    (status, err.to_string()).into_response()
}

// Keep redirect targets header-safe
fn query_safe(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_safe_strips_header_breaking_characters() {
        assert_eq!(
            query_safe("TX-1724567890123-a1b2c3d4"),
            "TX-1724567890123-a1b2c3d4"
        );
        assert_eq!(query_safe("success\r\nSet-Cookie: x"), "successSet-Cookie:x");
        assert_eq!(query_safe("ok?&=#"), "ok");
    }
}
