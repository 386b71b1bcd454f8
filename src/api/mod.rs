//! HTTP endpoint handlers

pub mod wallet;
pub mod webhooks;
