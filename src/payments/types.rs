use crate::payments::error::PaymentError;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub amount: String,
    pub currency: String,
}

impl Money {
    pub fn validate_positive(&self, field: &str) -> Result<(), PaymentError> {
        let parsed =
            BigDecimal::from_str(&self.amount).map_err(|_| PaymentError::ValidationError {
                message: format!("invalid decimal amount: {}", self.amount),
                field: Some(field.to_string()),
            })?;
        if parsed <= BigDecimal::from(0) {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some(field.to_string()),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    Success,
    Failed,
    Cancelled,
    Unknown,
}

impl PaymentState {
    /// Map the gateway's status strings onto the states the processor
    /// dispatches on. Anything unrecognized lands on Unknown and is
    /// acknowledged without touching the ledger.
    pub fn from_gateway(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "success" | "successful" => PaymentState::Success,
            "failed" | "failure" | "declined" => PaymentState::Failed,
            "pending" | "processing" | "in-progress" => PaymentState::Pending,
            "cancelled" | "canceled" => PaymentState::Cancelled,
            _ => PaymentState::Unknown,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PaymentState::Success)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerContact {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Metadata attached to a charge at initiation and echoed back by the
/// gateway on webhooks and verification responses.
///
/// Everything is optional on the way in: older checkout sessions and
/// manually-initiated payments arrive with partial or absent meta, and the
/// processor falls back to customer email lookup when it has to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMeta {
    #[serde(rename = "userId", alias = "user_id", default)]
    pub user_id: Option<String>,
    #[serde(rename = "transactionType", alias = "transaction_type", default)]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub amount: Option<JsonValue>,
}

impl EventMeta {
    /// Amount from metadata, tolerating both string and numeric encodings
    pub fn amount_as_string(&self) -> Option<String> {
        match &self.amount {
            Some(JsonValue::String(s)) => Some(s.clone()),
            Some(JsonValue::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Hosted checkout initiation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub amount: Money,
    pub customer: CustomerContact,
    pub tx_ref: String,
    pub callback_url: String,
    pub return_url: String,
    pub meta: EventMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeResponse {
    pub checkout_url: String,
    pub tx_ref: String,
    pub provider_data: Option<JsonValue>,
}

/// Bank payout request. The bank_uuid comes from the gateway's own bank
/// directory, so no local validation beyond non-emptiness applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub amount: Money,
    pub tx_ref: String,
    pub bank_uuid: String,
    pub bank_account_number: String,
    pub bank_account_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResponse {
    pub status: PaymentState,
    pub tx_ref: String,
    pub provider_reference: Option<String>,
    pub provider_data: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

/// A gateway notification normalized from any of the payload shapes
/// PayChangu delivers. Webhooks, POST callbacks and server-side
/// verification responses all reduce to this before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaychanguEvent {
    pub event_type: String,
    pub tx_ref: Option<String>,
    pub status: PaymentState,
    pub raw_status: String,
    pub amount: Option<String>,
    pub currency: Option<String>,
    pub customer: CustomerContact,
    pub meta: EventMeta,
    pub payload: JsonValue,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

impl PaychanguEvent {
    /// Best-available amount: the event body first, metadata echo second
    pub fn effective_amount(&self) -> Option<String> {
        self.amount.clone().or_else(|| self.meta.amount_as_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_request_serializes_with_camel_case_meta() {
        let request = ChargeRequest {
            amount: Money {
                amount: "1000.00".to_string(),
                currency: "MWK".to_string(),
            },
            customer: CustomerContact {
                email: Some("user@example.com".to_string()),
                phone: Some("+265991234567".to_string()),
                first_name: Some("Grace".to_string()),
                last_name: Some("Banda".to_string()),
            },
            tx_ref: "TX-1724567890123-a1b2c3d4".to_string(),
            callback_url: "https://example.com/api/paychangu/callback".to_string(),
            return_url: "https://example.com/wallet".to_string(),
            meta: EventMeta {
                user_id: Some("7be17ba7-6a7f-4a5d-9ed2-2a31be4a5f0a".to_string()),
                transaction_type: Some("Deposit".to_string()),
                amount: None,
            },
        };

        let json = serde_json::to_value(&request).expect("serialization should succeed");
        assert_eq!(json["amount"]["currency"], "MWK");
        assert_eq!(
            json["meta"]["userId"],
            "7be17ba7-6a7f-4a5d-9ed2-2a31be4a5f0a"
        );
        assert_eq!(json["meta"]["transactionType"], "Deposit");
    }

    #[test]
    fn event_meta_accepts_both_casings() {
        let camel: EventMeta = serde_json::from_value(serde_json::json!({
            "userId": "u1",
            "transactionType": "Withdrawal"
        }))
        .unwrap();
        assert_eq!(camel.user_id.as_deref(), Some("u1"));
        assert_eq!(camel.transaction_type.as_deref(), Some("Withdrawal"));

        let snake: EventMeta = serde_json::from_value(serde_json::json!({
            "user_id": "u2",
            "transaction_type": "deposit",
            "amount": 1000
        }))
        .unwrap();
        assert_eq!(snake.user_id.as_deref(), Some("u2"));
        assert_eq!(snake.amount_as_string().as_deref(), Some("1000"));
    }

    #[test]
    fn payment_state_maps_gateway_spellings() {
        assert_eq!(PaymentState::from_gateway("success"), PaymentState::Success);
        assert_eq!(
            PaymentState::from_gateway("Successful"),
            PaymentState::Success
        );
        assert_eq!(PaymentState::from_gateway("FAILED"), PaymentState::Failed);
        assert_eq!(PaymentState::from_gateway("pending"), PaymentState::Pending);
        assert_eq!(PaymentState::from_gateway("on-hold"), PaymentState::Unknown);
        assert!(PaymentState::Success.is_success());
        assert!(!PaymentState::Pending.is_success());
    }

    #[test]
    fn money_validation_rejects_non_positive_amounts() {
        let zero = Money {
            amount: "0".to_string(),
            currency: "MWK".to_string(),
        };
        assert!(zero.validate_positive("amount").is_err());

        let garbage = Money {
            amount: "12,5".to_string(),
            currency: "MWK".to_string(),
        };
        assert!(garbage.validate_positive("amount").is_err());

        let ok = Money {
            amount: "1000.00".to_string(),
            currency: "MWK".to_string(),
        };
        assert!(ok.validate_positive("amount").is_ok());
    }
}
