use crate::config::PaychanguConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::gateway::PaymentGateway;
use crate::payments::types::{
    ChargeRequest, ChargeResponse, CustomerContact, EventMeta, PaychanguEvent, PaymentState,
    TransferRequest, TransferResponse,
};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};

/// PayChangu client for the Malawi market (MWK).
///
/// Configuration is injected at construction; nothing here reads the
/// environment at call time.
pub struct PaychanguGateway {
    config: PaychanguConfig,
    http: PaymentHttpClient,
}

impl PaychanguGateway {
    pub fn new(config: PaychanguConfig) -> PaymentResult<Self> {
        let http =
            PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base, path)
    }

    fn require_field(value: &str, field: &str) -> PaymentResult<()> {
        if value.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: format!("{} is required", field),
                field: Some(field.to_string()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for PaychanguGateway {
    async fn initiate_payment(&self, request: ChargeRequest) -> PaymentResult<ChargeResponse> {
        request.amount.validate_positive("amount")?;
        if request
            .customer
            .email
            .as_deref()
            .unwrap_or("")
            .trim()
            .is_empty()
        {
            return Err(PaymentError::ValidationError {
                message: "customer.email is required for checkout initiation".to_string(),
                field: Some("customer.email".to_string()),
            });
        }

        let payload = serde_json::json!({
            "amount": request.amount.amount,
            "currency": request.amount.currency,
            "email": request.customer.email,
            "first_name": request.customer.first_name,
            "last_name": request.customer.last_name,
            "tx_ref": request.tx_ref,
            "callback_url": request.callback_url,
            "return_url": request.return_url,
            "meta": request.meta,
        });

        let raw: PaychanguEnvelope<PaychanguCheckoutData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/payment"),
                Some(&self.config.secret_key),
                Some(&payload),
                &[("Content-Type", "application/json")],
            )
            .await?;
        raw.ensure_success()?;

        info!(tx_ref = %request.tx_ref, "paychangu checkout session created");

        Ok(ChargeResponse {
            checkout_url: raw.data.checkout_url,
            tx_ref: request.tx_ref,
            provider_data: raw.data.data,
        })
    }

    async fn initiate_transfer(&self, request: TransferRequest) -> PaymentResult<TransferResponse> {
        request.amount.validate_positive("amount")?;
        Self::require_field(&request.bank_uuid, "bank_uuid")?;
        Self::require_field(&request.bank_account_number, "bank_account_number")?;
        Self::require_field(&request.bank_account_name, "bank_account_name")?;

        let payload = serde_json::json!({
            "amount": request.amount.amount,
            "currency": request.amount.currency,
            "bank_uuid": request.bank_uuid,
            "bank_account_number": request.bank_account_number,
            "bank_account_name": request.bank_account_name,
            "charge_id": request.tx_ref,
        });

        let raw: PaychanguEnvelope<PaychanguTransferData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/money-transfer"),
                Some(&self.config.secret_key),
                Some(&payload),
                &[("Content-Type", "application/json")],
            )
            .await?;
        raw.ensure_success()?;

        let transaction = raw.data.transaction.unwrap_or_default();
        let status = transaction
            .status
            .as_deref()
            .map(PaymentState::from_gateway)
            .unwrap_or(PaymentState::Pending);
        info!(tx_ref = %request.tx_ref, status = ?status, "paychangu transfer submitted");

        Ok(TransferResponse {
            status,
            tx_ref: request.tx_ref,
            provider_reference: transaction.ref_id.clone(),
            provider_data: Some(serde_json::json!({
                "ref_id": transaction.ref_id,
                "status": transaction.status,
            })),
        })
    }

    async fn verify_payment(&self, tx_ref: &str) -> PaymentResult<PaychanguEvent> {
        Self::require_field(tx_ref, "tx_ref")?;

        let raw: PaychanguEnvelope<JsonValue> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/verify-payment/{}", tx_ref)),
                Some(&self.config.secret_key),
                None,
                &[],
            )
            .await?;
        raw.ensure_success()?;

        let mut value = raw.data;
        if let Some(object) = value.as_object_mut() {
            // the path parameter is authoritative when the response omits it
            object
                .entry("tx_ref")
                .or_insert_with(|| JsonValue::String(tx_ref.to_string()));
            object
                .entry("event_type")
                .or_insert_with(|| JsonValue::String("payment.verification".to_string()));
        }

        normalize_value(value)
    }

    fn name(&self) -> &'static str {
        "paychangu"
    }
}

/// Normalize a raw webhook body into a [`PaychanguEvent`].
///
/// The gateway delivers two payload families: checkout webhooks carry the
/// event fields at the top level, payment-link webhooks nest them under
/// `data.payment_link`. Both reduce to the same event here; anything else
/// is a structured parse error.
pub fn normalize_payload(raw: &[u8]) -> PaymentResult<PaychanguEvent> {
    let parsed: JsonValue =
        serde_json::from_slice(raw).map_err(|e| PaymentError::InvalidPayloadError {
            message: format!("body is not valid JSON: {}", e),
        })?;
    normalize_value(parsed)
}

pub fn normalize_value(payload: JsonValue) -> PaymentResult<PaychanguEvent> {
    let body: RawWebhookBody = serde_json::from_value(payload.clone()).map_err(|e| {
        PaymentError::InvalidPayloadError {
            message: format!("unrecognized payload shape: {}", e),
        }
    })?;

    let (outer_event_type, fields) = match body {
        RawWebhookBody::Nested { event_type, data } => (event_type, data.payment_link),
        RawWebhookBody::Flat(fields) => (None, fields),
    };

    let raw_status = fields
        .status
        .filter(|s| !s.trim().is_empty())
        .ok_or(PaymentError::InvalidPayloadError {
            message: "payload has no status field".to_string(),
        })?;
    let tx_ref = fields
        .tx_ref
        .filter(|s| !s.trim().is_empty())
        .ok_or(PaymentError::InvalidPayloadError {
            message: "payload has no tx_ref".to_string(),
        })?;

    Ok(PaychanguEvent {
        event_type: fields
            .event_type
            .or(outer_event_type)
            .unwrap_or_else(|| "unknown".to_string()),
        tx_ref: Some(tx_ref),
        status: PaymentState::from_gateway(&raw_status),
        raw_status,
        amount: amount_to_string(fields.amount.as_ref()),
        currency: fields.currency,
        customer: fields.customer.unwrap_or_default(),
        meta: parse_meta(fields.meta),
        payload,
        received_at: chrono::Utc::now(),
    })
}

/// Metadata arrives as an object or as a JSON-encoded string depending on
/// which gateway product sent the event. Malformed metadata degrades to
/// empty rather than rejecting the whole notification.
fn parse_meta(raw: Option<JsonValue>) -> EventMeta {
    match raw {
        Some(value @ JsonValue::Object(_)) => serde_json::from_value(value).unwrap_or_default(),
        Some(JsonValue::String(encoded)) => serde_json::from_str(&encoded).unwrap_or_else(|e| {
            warn!(error = %e, "webhook meta is a string but not valid JSON");
            EventMeta::default()
        }),
        _ => EventMeta::default(),
    }
}

fn amount_to_string(raw: Option<&JsonValue>) -> Option<String> {
    match raw {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawWebhookBody {
    Nested {
        #[serde(default)]
        event_type: Option<String>,
        data: NestedPaymentData,
    },
    Flat(RawEventFields),
}

#[derive(Debug, Deserialize)]
struct NestedPaymentData {
    payment_link: RawEventFields,
}

#[derive(Debug, Default, Deserialize)]
struct RawEventFields {
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default, alias = "reference")]
    tx_ref: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    amount: Option<JsonValue>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    customer: Option<CustomerContact>,
    #[serde(default)]
    meta: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct PaychanguEnvelope<T> {
    status: String,
    #[serde(default)]
    message: Option<String>,
    data: T,
}

impl<T> PaychanguEnvelope<T> {
    fn ensure_success(&self) -> PaymentResult<()> {
        if self.status.eq_ignore_ascii_case("success") {
            return Ok(());
        }
        Err(PaymentError::ProviderError {
            provider: "paychangu".to_string(),
            message: self
                .message
                .clone()
                .unwrap_or_else(|| format!("gateway returned status '{}'", self.status)),
            provider_code: Some(self.status.clone()),
            retryable: false,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PaychanguCheckoutData {
    checkout_url: String,
    #[serde(default)]
    data: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct PaychanguTransferData {
    #[serde(default)]
    transaction: Option<PaychanguTransferTransaction>,
}

#[derive(Debug, Default, Deserialize)]
struct PaychanguTransferTransaction {
    #[serde(default)]
    ref_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::Money;

    fn gateway() -> PaychanguGateway {
        PaychanguGateway::new(PaychanguConfig {
            secret_key: "sec-test-key".to_string(),
            webhook_secret: None,
            api_base: "https://api.paychangu.com".to_string(),
            callback_url: "https://example.com/api/paychangu/callback".to_string(),
            return_url: "https://example.com/wallet".to_string(),
            timeout_secs: 5,
            max_retries: 1,
            allow_unsigned_webhooks: false,
        })
        .expect("gateway init should succeed")
    }

    #[test]
    fn normalizes_flat_checkout_payload() {
        let body = serde_json::json!({
            "event_type": "api.charge.payment",
            "tx_ref": "TX-1724567890123-a1b2c3d4",
            "status": "success",
            "amount": 1000,
            "currency": "MWK",
            "customer": {"email": "grace@example.com", "first_name": "Grace"},
            "meta": {"userId": "7be17ba7-6a7f-4a5d-9ed2-2a31be4a5f0a", "transactionType": "Deposit"}
        });

        let event = normalize_value(body).expect("flat payload should normalize");
        assert_eq!(event.event_type, "api.charge.payment");
        assert_eq!(event.tx_ref.as_deref(), Some("TX-1724567890123-a1b2c3d4"));
        assert_eq!(event.status, PaymentState::Success);
        assert_eq!(event.amount.as_deref(), Some("1000"));
        assert_eq!(event.currency.as_deref(), Some("MWK"));
        assert_eq!(event.customer.email.as_deref(), Some("grace@example.com"));
        assert_eq!(event.meta.transaction_type.as_deref(), Some("Deposit"));
    }

    #[test]
    fn normalizes_nested_payment_link_payload() {
        let body = serde_json::json!({
            "event_type": "checkout.payment",
            "data": {
                "payment_link": {
                    "reference": "TX-1724567890123-a1b2c3d4",
                    "status": "successful",
                    "amount": "2500.00",
                    "currency": "MWK",
                    "customer": {"email": "grace@example.com"}
                }
            }
        });

        let event = normalize_value(body).expect("nested payload should normalize");
        assert_eq!(event.event_type, "checkout.payment");
        assert_eq!(event.tx_ref.as_deref(), Some("TX-1724567890123-a1b2c3d4"));
        assert_eq!(event.status, PaymentState::Success);
        assert_eq!(event.amount.as_deref(), Some("2500.00"));
    }

    #[test]
    fn normalizes_meta_delivered_as_json_string() {
        let body = serde_json::json!({
            "tx_ref": "TX-1724567890123-a1b2c3d4",
            "status": "success",
            "meta": "{\"userId\":\"u1\",\"transactionType\":\"Withdrawal\"}"
        });

        let event = normalize_value(body).expect("string meta should normalize");
        assert_eq!(event.meta.user_id.as_deref(), Some("u1"));
        assert_eq!(event.meta.transaction_type.as_deref(), Some("Withdrawal"));
    }

    #[test]
    fn malformed_meta_degrades_to_empty() {
        let body = serde_json::json!({
            "tx_ref": "TX-1",
            "status": "success",
            "meta": "not json at all"
        });

        let event = normalize_value(body).expect("event should still normalize");
        assert!(event.meta.user_id.is_none());
        assert!(event.meta.transaction_type.is_none());
    }

    #[test]
    fn rejects_payload_without_status_or_tx_ref() {
        let no_status = serde_json::json!({"tx_ref": "TX-1", "amount": 100});
        assert!(matches!(
            normalize_value(no_status),
            Err(PaymentError::InvalidPayloadError { .. })
        ));

        let no_ref = serde_json::json!({"status": "success"});
        assert!(matches!(
            normalize_value(no_ref),
            Err(PaymentError::InvalidPayloadError { .. })
        ));

        let not_an_object = serde_json::json!(["success"]);
        assert!(matches!(
            normalize_value(not_an_object),
            Err(PaymentError::InvalidPayloadError { .. })
        ));
    }

    #[test]
    fn rejects_body_that_is_not_json() {
        let result = normalize_payload(b"status=success&tx_ref=TX-1");
        assert!(matches!(
            result,
            Err(PaymentError::InvalidPayloadError { .. })
        ));
    }

    #[tokio::test]
    async fn charge_requires_customer_email() {
        let gateway = gateway();
        let result = gateway
            .initiate_payment(ChargeRequest {
                amount: Money {
                    amount: "1000".to_string(),
                    currency: "MWK".to_string(),
                },
                customer: CustomerContact::default(),
                tx_ref: "TX-1".to_string(),
                callback_url: "https://example.com/cb".to_string(),
                return_url: "https://example.com/rt".to_string(),
                meta: EventMeta::default(),
            })
            .await;
        assert!(matches!(
            result,
            Err(PaymentError::ValidationError { .. })
        ));
    }

    #[tokio::test]
    async fn transfer_requires_bank_details() {
        let gateway = gateway();
        let result = gateway
            .initiate_transfer(TransferRequest {
                amount: Money {
                    amount: "500".to_string(),
                    currency: "MWK".to_string(),
                },
                tx_ref: "TX-2".to_string(),
                bank_uuid: "".to_string(),
                bank_account_number: "100200300".to_string(),
                bank_account_name: "Grace Banda".to_string(),
            })
            .await;
        assert!(matches!(
            result,
            Err(PaymentError::ValidationError { .. })
        ));
    }
}
