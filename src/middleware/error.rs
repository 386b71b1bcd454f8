//! JSON envelopes for error and success responses
//!
//! Every handler speaks the same wire shape: errors serialize to an
//! `ErrorResponse` with a machine-readable code, successes to a
//! `{success, data, timestamp}` envelope.

use crate::error::{AppError, ErrorCode};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Wire shape of every error the API returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable code clients can branch on
    pub error: ErrorCode,

    /// Message safe to surface to an end user
    pub message: String,

    /// Request ID, when the caller supplied or was assigned one
    pub request_id: Option<String>,

    /// RFC 3339 timestamp of when the error was produced
    pub timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Hint that retrying the same request may succeed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(error.is_retryable()),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Catch-all 500 body that leaks nothing about the failure.
    pub fn internal_error(request_id: Option<String>) -> Self {
        Self {
            error: ErrorCode::InternalError,
            message: "An unexpected error occurred. Please try again later.".to_string(),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(false),
        }
    }

    /// 4xx body naming the offending field, with the raw reason in `details`.
    pub fn validation_error(request_id: Option<String>, field: &str, message: &str) -> Self {
        Self {
            error: ErrorCode::ValidationError,
            message: format!("Validation failed for field '{}'", field),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            details: Some(serde_json::json!({
                "field": field,
                "error": message,
            })),
            retryable: Some(false),
        }
    }
}

/// Lets handlers return `Result<_, AppError>` and get a formatted JSON
/// body with the right status code for free.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status_code.is_server_error() {
            tracing::error!(
                error = ?self,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Request failed with server error"
            );
        } else {
            tracing::warn!(
                error = ?self,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Request rejected"
            );
        }

        let body = ErrorResponse::from_app_error(&self);
        (status_code, Json(body)).into_response()
    }
}

/// Wrap `data` in the `{success, data, timestamp}` envelope.
///
/// # Example
/// ```no_run
/// use Chikwama_backend::middleware::error::success_response;
/// use serde_json::json;
///
/// let response = success_response(json!({
///     "tx_ref": "TX-1724567890123-a1b2c3d4",
///     "status": "completed"
/// }));
/// ```
pub fn success_response<T: Serialize>(data: T) -> impl IntoResponse {
    Json(serde_json::json!({
        "success": true,
        "data": data,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Same envelope with a `meta` object alongside the data, used by list
/// endpoints for counts and paging.
///
/// # Example
/// ```no_run
/// use Chikwama_backend::middleware::error::success_response_with_meta;
/// use serde_json::json;
///
/// let response = success_response_with_meta(
///     json!([{"id": 1}, {"id": 2}]),
///     json!({
///         "count": 2,
///         "limit": 50
///     })
/// );
/// ```
pub fn success_response_with_meta<T: Serialize, M: Serialize>(
    data: T,
    meta: M,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "success": true,
        "data": data,
        "meta": meta,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub fn get_request_id_from_headers(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Formatted JSON error for handlers that work in `(StatusCode, message)`
/// terms rather than `AppError`.
pub fn json_error_response(
    status: StatusCode,
    message: impl Into<String>,
    request_id: Option<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    let message = message.into();
    let body = if status.is_client_error() {
        ErrorResponse::validation_error(request_id, "request", &message)
            .with_details(serde_json::json!({ "message": message }))
    } else {
        ErrorResponse::internal_error(request_id)
    };

    (status, Json(body))
}
