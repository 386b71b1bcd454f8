//! Chikwama backend: wallet ledger and PayChangu reconciliation service
//!
//! The ledger is the source of truth for user balances in MWK. Deposits
//! arrive through PayChangu hosted checkout and are credited when the
//! signed webhook confirms the charge; withdrawals reserve funds up
//! front and reverse themselves when the payout fails.

pub mod api;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
