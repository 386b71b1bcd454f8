use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl PaymentHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: Option<&str>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);

            if let Some(token) = bearer_token {
                request = request.bearer_auth(token);
            }
            for (k, v) in additional_headers {
                request = request.header(*k, *v);
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let response = request
                .send()
                .await
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("gateway request failed: {}", e),
                });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            PaymentError::ProviderError {
                                provider: "paychangu".to_string(),
                                message: format!("invalid gateway JSON response: {}", e),
                                provider_code: None,
                                retryable: false,
                            }
                        });
                    }

                    if status.as_u16() == 429 {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                            continue;
                        }
                        return Err(PaymentError::RateLimitError {
                            message: "gateway rate limit exceeded".to_string(),
                            retry_after_seconds: None,
                        });
                    }

                    if status.is_server_error() && attempt < self.max_retries {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            "gateway server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    return Err(PaymentError::ProviderError {
                        provider: "paychangu".to_string(),
                        message: format!("HTTP {}: {}", status, text),
                        provider_code: Some(status.as_u16().to_string()),
                        retryable: status.is_server_error(),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(PaymentError::NetworkError {
            message: "gateway request failed".to_string(),
        }))
    }
}

/// Verify an HMAC-SHA256 hex signature over a raw webhook body.
///
/// Fails closed before any comparison: the secret must carry the gateway's
/// `sec-` key prefix and the signature must be exactly one SHA-256 digest
/// in hex. Comparison is constant-time.
pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    if !secret.starts_with("sec-") {
        return false;
    }

    let signature = signature.trim();
    if signature.len() != 64 || !signature.bytes().all(|b| b.is_ascii_hexdigit()) {
        return false;
    }

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return false,
    };
    mac.update(payload);
    let computed = hex::encode(mac.finalize().into_bytes());
    secure_eq(computed.as_bytes(), signature.to_lowercase().as_bytes())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Generate an external correlation reference, e.g. `TX-1724567890123-a1b2c3d4`
pub fn generate_tx_ref(prefix: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let entropy = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, millis, &entropy[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    fn sign(payload: &[u8], secret: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn webhook_hmac_verification_accepts_valid_signature() {
        let payload = br#"{"event_type":"checkout.payment","status":"success"}"#;
        let secret = "sec-test-abc123";
        let signature = sign(payload, secret);

        assert!(verify_hmac_sha256_hex(payload, secret, &signature));
        assert!(verify_hmac_sha256_hex(
            payload,
            secret,
            &signature.to_uppercase()
        ));
    }

    #[test]
    fn webhook_hmac_verification_detects_tampering() {
        let payload = br#"{"amount":"1000.00"}"#;
        let secret = "sec-test-abc123";
        let signature = sign(payload, secret);

        assert!(!verify_hmac_sha256_hex(
            br#"{"amount":"9000.00"}"#,
            secret,
            &signature
        ));
        assert!(!verify_hmac_sha256_hex(
            payload,
            "sec-test-other",
            &signature
        ));
    }

    #[test]
    fn webhook_hmac_verification_fails_closed_on_malformed_input() {
        let payload = br#"{"event":"checkout.payment"}"#;

        // non-hex and wrong-length signatures are rejected before comparison
        assert!(!verify_hmac_sha256_hex(
            payload,
            "sec-test-abc123",
            "not-a-valid-signature"
        ));
        assert!(!verify_hmac_sha256_hex(payload, "sec-test-abc123", "abc123"));

        // secrets without the gateway prefix never verify
        let signature = sign(payload, "unprefixed-secret");
        assert!(!verify_hmac_sha256_hex(
            payload,
            "unprefixed-secret",
            &signature
        ));
    }

    #[test]
    fn generated_tx_refs_are_unique_and_prefixed() {
        let a = generate_tx_ref("TX");
        let b = generate_tx_ref("TX");

        assert!(a.starts_with("TX-"));
        assert_ne!(a, b);
        assert_eq!(a.split('-').count(), 3);
    }
}
