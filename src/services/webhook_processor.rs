//! Inbound gateway notification handling
//!
//! Each request walks one path: verify the signature, normalize the
//! payload, write the audit row, then dispatch to the ledger. Only a
//! `success` gateway status ever reaches the ledger, and a duplicate
//! reference is a successful no-op, not an error.

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::transaction_repository::TransactionType;
use crate::database::user_repository::{User, UserRepository};
use crate::database::webhook_event_repository::WebhookEventRepository;
use crate::error::{AppError, AppErrorKind, DomainError};
use crate::payments::gateway::{PaymentGateway, SignatureVerifier};
use crate::payments::providers::paychangu::normalize_payload;
use crate::payments::types::PaychanguEvent;
use crate::services::ledger::{CompletionOutcome, LedgerService};

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Missing signature")]
    MissingSignature,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Undeliverable event: {0}")]
    Undeliverable(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Processing error: {0}")]
    ProcessingError(String),
}

/// How a verified, well-formed notification was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The ledger was mutated
    Applied { tx_ref: String, message: String },
    /// A live transaction already carries this reference
    AlreadyProcessed { tx_ref: String },
    /// Acknowledged without touching the ledger
    Ignored { tx_ref: String, status: String },
}

pub struct WebhookProcessor {
    ledger: Arc<LedgerService>,
    users: UserRepository,
    events: WebhookEventRepository,
    verifier: Arc<dyn SignatureVerifier>,
    gateway: Arc<dyn PaymentGateway>,
}

impl WebhookProcessor {
    pub fn new(
        ledger: Arc<LedgerService>,
        users: UserRepository,
        events: WebhookEventRepository,
        verifier: Arc<dyn SignatureVerifier>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            ledger,
            users,
            events,
            verifier,
            gateway,
        }
    }

    /// Handle a signed server-to-server notification body.
    pub async fn process_webhook(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let verification = self.verifier.verify(raw_body, signature.unwrap_or(""));
        if !verification.valid {
            warn!(
                reason = verification.reason.as_deref().unwrap_or("unspecified"),
                "webhook signature rejected"
            );
            return Err(match signature {
                None => WebhookProcessorError::MissingSignature,
                Some(_) => WebhookProcessorError::InvalidSignature,
            });
        }

        let event = normalize_payload(raw_body)
            .map_err(|e| WebhookProcessorError::InvalidPayload(e.to_string()))?;

        self.dispatch_event(event, signature).await
    }

    /// Handle the browser-redirect callback: the query string only names a
    /// tx_ref, so the authoritative state comes from a server-side
    /// verification call before dispatch.
    pub async fn process_callback(
        &self,
        tx_ref: &str,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let event = self
            .gateway
            .verify_payment(tx_ref)
            .await
            .map_err(|e| WebhookProcessorError::ProcessingError(e.to_string()))?;

        self.dispatch_event(event, None).await
    }

    async fn dispatch_event(
        &self,
        event: PaychanguEvent,
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let tx_ref = event.tx_ref.clone().ok_or_else(|| {
            WebhookProcessorError::InvalidPayload("event has no tx_ref".to_string())
        })?;
        let event_id = format!("{}:{}", tx_ref, event.event_type);

        // Audit log, best effort: a failed write never blocks reconciliation
        let audited = match self
            .events
            .log_event(
                &event_id,
                self.gateway.name(),
                &event.event_type,
                &event.payload,
                signature,
            )
            .await
        {
            Ok(row) => {
                if row.retry_count > 0 {
                    info!(
                        event_id = %event_id,
                        retry_count = row.retry_count,
                        "gateway redelivered a known event"
                    );
                }
                true
            }
            Err(e) => {
                warn!(event_id = %event_id, error = %e, "webhook audit write failed");
                false
            }
        };

        if !event.status.is_success() {
            info!(
                tx_ref = %tx_ref,
                status = %event.raw_status,
                "acknowledging non-success gateway status"
            );
            if audited {
                self.mark_audit(&event_id, AuditMark::Ignored).await;
            }
            return Ok(WebhookOutcome::Ignored {
                tx_ref,
                status: event.raw_status.clone(),
            });
        }

        let declared = event.meta.transaction_type.as_deref();
        let result = match declared.and_then(TransactionType::parse) {
            Some(TransactionType::Withdrawal) => {
                self.complete_withdrawal_event(&tx_ref, &event).await
            }
            Some(TransactionType::Deposit) => self.deposit_event(&tx_ref, &event).await,
            _ => {
                if let Some(declared) = declared {
                    warn!(
                        tx_ref = %tx_ref,
                        declared = declared,
                        "unrecognized transaction type, attempting deposit fallback"
                    );
                }
                self.deposit_event(&tx_ref, &event).await
            }
        };

        if audited {
            match &result {
                Ok(WebhookOutcome::Applied { .. }) => {
                    self.mark_audit(&event_id, AuditMark::Processed).await;
                }
                Ok(_) => self.mark_audit(&event_id, AuditMark::Ignored).await,
                Err(e) => {
                    self.mark_audit(&event_id, AuditMark::Failed(e.to_string()))
                        .await;
                }
            }
        }

        result
    }

    async fn deposit_event(
        &self,
        tx_ref: &str,
        event: &PaychanguEvent,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let user = self.resolve_user(event).await?;
        let raw_amount = event.effective_amount().ok_or_else(|| {
            WebhookProcessorError::InvalidPayload("event carries no amount".to_string())
        })?;
        let gross = LedgerService::parse_amount(&raw_amount)
            .map_err(|e| WebhookProcessorError::InvalidPayload(e.to_string()))?;

        match self
            .ledger
            .process_deposit(user.id, gross, tx_ref, &event.payload)
            .await
        {
            Ok(receipt) => Ok(WebhookOutcome::Applied {
                tx_ref: tx_ref.to_string(),
                message: format!("Deposit of {} credited", receipt.credited),
            }),
            Err(err)
                if matches!(
                    err.kind,
                    AppErrorKind::Domain(DomainError::DuplicateTransaction { .. })
                ) =>
            {
                info!(tx_ref = %tx_ref, "deposit already applied");
                Ok(WebhookOutcome::AlreadyProcessed {
                    tx_ref: tx_ref.to_string(),
                })
            }
            Err(err) => Err(map_ledger_error(err)),
        }
    }

    async fn complete_withdrawal_event(
        &self,
        tx_ref: &str,
        event: &PaychanguEvent,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        match self.ledger.complete_withdrawal(tx_ref, &event.payload).await {
            Ok(CompletionOutcome::Completed) => Ok(WebhookOutcome::Applied {
                tx_ref: tx_ref.to_string(),
                message: "Withdrawal completed".to_string(),
            }),
            Ok(CompletionOutcome::AlreadyCompleted) => {
                info!(tx_ref = %tx_ref, "withdrawal already completed");
                Ok(WebhookOutcome::AlreadyProcessed {
                    tx_ref: tx_ref.to_string(),
                })
            }
            Err(err) => Err(map_ledger_error(err)),
        }
    }

    /// Resolve the wallet owner for a deposit: the user id the checkout was
    /// initiated with, else the customer email on the event.
    async fn resolve_user(&self, event: &PaychanguEvent) -> Result<User, WebhookProcessorError> {
        if let Some(raw_id) = event.meta.user_id.as_deref() {
            match Uuid::parse_str(raw_id.trim()) {
                Ok(user_id) => match self.users.find_by_id(user_id).await {
                    Ok(Some(user)) => return Ok(user),
                    Ok(None) => {
                        warn!(user_id = %user_id, "webhook meta references a missing user")
                    }
                    Err(e) => return Err(WebhookProcessorError::DatabaseError(e.to_string())),
                },
                Err(_) => warn!(raw = raw_id, "webhook meta user id is not a UUID"),
            }
        }

        if let Some(email) = event
            .customer
            .email
            .as_deref()
            .filter(|e| !e.trim().is_empty())
        {
            match self.users.find_by_email(email).await {
                Ok(Some(user)) => {
                    info!(user_id = %user.id, "webhook user resolved by customer email");
                    return Ok(user);
                }
                Ok(None) => {}
                Err(e) => return Err(WebhookProcessorError::DatabaseError(e.to_string())),
            }
        }

        Err(WebhookProcessorError::Undeliverable(
            "no user matches the event metadata or customer email".to_string(),
        ))
    }

    async fn mark_audit(&self, event_id: &str, mark: AuditMark) {
        let result = match &mark {
            AuditMark::Processed => self.events.mark_processed(event_id).await,
            AuditMark::Ignored => self.events.mark_ignored(event_id).await,
            AuditMark::Failed(error) => self.events.record_failure(event_id, error).await,
        };
        if let Err(e) = result {
            warn!(event_id = %event_id, error = %e, "webhook audit update failed");
        }
    }
}

enum AuditMark {
    Processed,
    Ignored,
    Failed(String),
}

fn map_ledger_error(err: AppError) -> WebhookProcessorError {
    match &err.kind {
        AppErrorKind::Domain(DomainError::InvalidAmount { .. }) => {
            WebhookProcessorError::InvalidPayload(err.to_string())
        }
        AppErrorKind::Domain(_) => WebhookProcessorError::Undeliverable(err.to_string()),
        AppErrorKind::Infrastructure(_) => WebhookProcessorError::DatabaseError(err.to_string()),
        _ => WebhookProcessorError::ProcessingError(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalletConfig;
    use crate::error::InfrastructureError;
    use crate::payments::error::PaymentResult;
    use crate::payments::gateway::{HmacSignatureVerifier, InsecureVerifier};
    use crate::payments::types::{
        ChargeRequest, ChargeResponse, CustomerContact, EventMeta, PaymentState, TransferRequest,
        TransferResponse,
    };
    use async_trait::async_trait;
    use sqlx::PgPool;

    struct StaticGateway;

    #[async_trait]
    impl PaymentGateway for StaticGateway {
        async fn initiate_payment(&self, request: ChargeRequest) -> PaymentResult<ChargeResponse> {
            Ok(ChargeResponse {
                checkout_url: "https://checkout.example.com".to_string(),
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
                provider_reference: None,
                provider_data: None,
            })
        }

        async fn verify_payment(&self, tx_ref: &str) -> PaymentResult<PaychanguEvent> {
            Ok(PaychanguEvent {
                event_type: "payment.verification".to_string(),
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
            "paychangu"
        }
    }

    fn wallet_config() -> WalletConfig {
        WalletConfig {
            currency: "MWK".to_string(),
            deposit_fee_percent: "2.5".to_string(),
            withdrawal_fee_percent: "2.5".to_string(),
            stuck_withdrawal_hours: 1,
            wallet_page_url: "https://example.com/wallet".to_string(),
        }
    }

    fn processor(verifier: Arc<dyn SignatureVerifier>) -> WebhookProcessor {
        let pool = PgPool::connect_lazy("postgresql://test").unwrap();
        let ledger = Arc::new(LedgerService::new(pool.clone(), &wallet_config(), None).unwrap());
        WebhookProcessor::new(
            ledger,
            UserRepository::new(pool.clone()),
            WebhookEventRepository::new(pool),
            verifier,
            Arc::new(StaticGateway),
        )
    }

    #[tokio::test]
    async fn unsigned_webhook_is_rejected() {
        let processor = processor(Arc::new(HmacSignatureVerifier::new("sec-test-key")));
        let body = br#"{"tx_ref":"TX-1","status":"success"}"#;

        let err = processor.process_webhook(body, None).await.unwrap_err();
        assert!(matches!(err, WebhookProcessorError::MissingSignature));

        let err = processor
            .process_webhook(body, Some("deadbeef"))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookProcessorError::InvalidSignature));
    }

    #[tokio::test]
    async fn malformed_body_is_rejected_before_any_database_work() {
        let processor = processor(Arc::new(InsecureVerifier));

        let err = processor
            .process_webhook(b"status=success&tx_ref=TX-1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookProcessorError::InvalidPayload(_)));

        let err = processor
            .process_webhook(br#"{"amount": 100}"#, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookProcessorError::InvalidPayload(_)));
    }

    #[test]
    fn ledger_errors_map_onto_processor_errors() {
        let missing_user = map_ledger_error(AppError::new(AppErrorKind::Domain(
            DomainError::UserNotFound {
                user_id: "u1".to_string(),
            },
        )));
        assert!(matches!(
            missing_user,
            WebhookProcessorError::Undeliverable(_)
        ));

        let infra = map_ledger_error(AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Database {
                message: "pool exhausted".to_string(),
                is_retryable: true,
            },
        )));
        assert!(matches!(infra, WebhookProcessorError::DatabaseError(_)));

        let amount = map_ledger_error(AppError::new(AppErrorKind::Domain(
            DomainError::InvalidAmount {
                amount: "-1".to_string(),
                reason: "negative".to_string(),
            },
        )));
        assert!(matches!(amount, WebhookProcessorError::InvalidPayload(_)));
    }

    #[test]
    fn error_messages_are_stable() {
        assert_eq!(
            WebhookProcessorError::MissingSignature.to_string(),
            "Missing signature"
        );
        assert_eq!(
            WebhookProcessorError::InvalidPayload("no status".to_string()).to_string(),
            "Invalid payload: no status"
        );
    }
}
