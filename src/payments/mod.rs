//! Payment gateway integration for wallet deposits and withdrawals

pub mod error;
pub mod gateway;
pub mod providers;
pub mod types;
pub mod utils;

// Re-export the surface the rest of the app works against
pub use error::{PaymentError, PaymentResult};
pub use gateway::{HmacSignatureVerifier, InsecureVerifier, PaymentGateway, SignatureVerifier};
pub use providers::paychangu::PaychanguGateway;
pub use types::{
    ChargeRequest, ChargeResponse, CustomerContact, EventMeta, Money, PaychanguEvent, PaymentState,
    TransferRequest, TransferResponse, WebhookVerificationResult,
};
pub use utils::generate_tx_ref;
