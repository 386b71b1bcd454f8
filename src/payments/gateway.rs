use crate::payments::error::PaymentResult;
use crate::payments::types::{
    ChargeRequest, ChargeResponse, PaychanguEvent, TransferRequest, TransferResponse,
    WebhookVerificationResult,
};
use crate::payments::utils::verify_hmac_sha256_hex;
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

/// Hosted-checkout payment gateway.
///
/// Handlers and services depend on this trait rather than a concrete
/// provider so tests can substitute a mock gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a hosted checkout session for a deposit.
    async fn initiate_payment(&self, request: ChargeRequest) -> PaymentResult<ChargeResponse>;

    /// Push a payout to the customer's bank account.
    async fn initiate_transfer(&self, request: TransferRequest) -> PaymentResult<TransferResponse>;

    /// Fetch the authoritative state of a transaction from the gateway.
    ///
    /// Used by the browser-redirect callback path, where the query string
    /// cannot be trusted and the status must be confirmed server-side.
    async fn verify_payment(&self, tx_ref: &str) -> PaymentResult<PaychanguEvent>;

    fn name(&self) -> &'static str;
}

/// Webhook signature verification, selected once at startup.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, payload: &[u8], signature: &str) -> WebhookVerificationResult;
}

fn hex_digest_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9a-fA-F]{64}$").expect("hardcoded pattern"))
}

/// Verifies `Signature` headers as HMAC-SHA256 over the raw request body.
pub struct HmacSignatureVerifier {
    secret: String,
}

impl HmacSignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl SignatureVerifier for HmacSignatureVerifier {
    fn verify(&self, payload: &[u8], signature: &str) -> WebhookVerificationResult {
        let signature = signature.trim();

        if !self.secret.starts_with("sec-") {
            return WebhookVerificationResult {
                valid: false,
                reason: Some("webhook secret is not a gateway secret key".to_string()),
            };
        }

        if !hex_digest_pattern().is_match(signature) {
            return WebhookVerificationResult {
                valid: false,
                reason: Some("signature is not a hex-encoded SHA-256 digest".to_string()),
            };
        }

        if verify_hmac_sha256_hex(payload, &self.secret, signature) {
            WebhookVerificationResult {
                valid: true,
                reason: None,
            }
        } else {
            WebhookVerificationResult {
                valid: false,
                reason: Some("signature does not match request body".to_string()),
            }
        }
    }
}

/// Accepts every webhook without checking the signature.
///
/// Only constructed when `ALLOW_UNSIGNED_WEBHOOKS` is set, and refused
/// outright in production. Intended for local development against
/// gateway sandboxes that do not sign their callbacks.
pub struct InsecureVerifier;

impl InsecureVerifier {
    pub fn new() -> Self {
        warn!("webhook signature verification is DISABLED, do not run this in production");
        Self
    }
}

impl Default for InsecureVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureVerifier for InsecureVerifier {
    fn verify(&self, _payload: &[u8], _signature: &str) -> WebhookVerificationResult {
        WebhookVerificationResult {
            valid: true,
            reason: Some("signature verification disabled".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{CustomerContact, EventMeta, Money, PaymentState};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    struct MockGateway;

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn initiate_payment(&self, request: ChargeRequest) -> PaymentResult<ChargeResponse> {
            Ok(ChargeResponse {
                checkout_url: "https://checkout.example.com/pay".to_string(),
                tx_ref: request.tx_ref,
                provider_data: None,
            })
        }

        async fn initiate_transfer(
            &self,
            request: TransferRequest,
        ) -> PaymentResult<TransferResponse> {
            Ok(TransferResponse {
                status: PaymentState::Pending,
                tx_ref: request.tx_ref,
                provider_reference: Some("mock_transfer".to_string()),
                provider_data: None,
            })
        }

        async fn verify_payment(&self, tx_ref: &str) -> PaymentResult<PaychanguEvent> {
            Ok(PaychanguEvent {
                event_type: "checkout.payment".to_string(),
                tx_ref: Some(tx_ref.to_string()),
                status: PaymentState::Success,
                raw_status: "success".to_string(),
                amount: Some("1000".to_string()),
                currency: Some("MWK".to_string()),
                customer: CustomerContact::default(),
                meta: EventMeta::default(),
                payload: serde_json::json!({}),
                received_at: chrono::Utc::now(),
            })
        }

        fn name(&self) -> &'static str {
            "mock"
        }
    }

    fn sign(payload: &[u8], secret: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_gateway() {
        let gateway: Box<dyn PaymentGateway> = Box::new(MockGateway);

        let charge = gateway
            .initiate_payment(ChargeRequest {
                amount: Money {
                    amount: "1000".to_string(),
                    currency: "MWK".to_string(),
                },
                customer: CustomerContact {
                    email: Some("test@example.com".to_string()),
                    ..Default::default()
                },
                tx_ref: "TX-1724567890123-a1b2c3d4".to_string(),
                callback_url: "https://example.com/api/paychangu/callback".to_string(),
                return_url: "https://example.com/wallet".to_string(),
                meta: EventMeta::default(),
            })
            .await
            .expect("charge should succeed");
        assert_eq!(charge.tx_ref, "TX-1724567890123-a1b2c3d4");

        let verified = gateway
            .verify_payment("TX-1724567890123-a1b2c3d4")
            .await
            .expect("verification should succeed");
        assert_eq!(verified.status, PaymentState::Success);
    }

    #[test]
    fn hmac_verifier_accepts_matching_signature() {
        let secret = "sec-test-key";
        let payload = br#"{"event_type":"api.charge.payment"}"#;
        let verifier = HmacSignatureVerifier::new(secret);

        let result = verifier.verify(payload, &sign(payload, secret));
        assert!(result.valid);
        assert!(result.reason.is_none());
    }

    #[test]
    fn hmac_verifier_rejects_with_reason() {
        let secret = "sec-test-key";
        let payload = br#"{"event_type":"api.charge.payment"}"#;
        let verifier = HmacSignatureVerifier::new(secret);

        let malformed = verifier.verify(payload, "definitely-not-hex");
        assert!(!malformed.valid);
        assert!(malformed.reason.unwrap().contains("hex-encoded"));

        let mismatched = verifier.verify(payload, &sign(b"other body", secret));
        assert!(!mismatched.valid);
        assert!(mismatched.reason.unwrap().contains("does not match"));
    }

    #[test]
    fn hmac_verifier_rejects_unprefixed_secret() {
        let payload = br#"{}"#;
        let verifier = HmacSignatureVerifier::new("plain-secret");
        let result = verifier.verify(payload, &sign(payload, "plain-secret"));
        assert!(!result.valid);
    }

    #[test]
    fn insecure_verifier_accepts_anything() {
        let verifier = InsecureVerifier;
        let result = verifier.verify(b"whatever", "");
        assert!(result.valid);
    }
}
