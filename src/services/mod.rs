//! Services module for wallet business logic

pub mod balance;
pub mod ledger;
pub mod webhook_processor;

// Re-export the types handlers wire together
pub use balance::{BalanceService, TransactionView, WalletBalance};
pub use ledger::{
    CompletionOutcome, DepositReceipt, LedgerService, SweepReport, WithdrawalReceipt,
};
pub use webhook_processor::{WebhookOutcome, WebhookProcessor, WebhookProcessorError};
