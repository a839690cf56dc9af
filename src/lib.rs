//! mintgate - fee-gated SPL token operations and a membership paywall
//!
//! Token creation, burning, metadata updates and authority revocation are
//! each one Solana transaction that ends with a service-fee transfer to the
//! treasury. Active members pay a minimal fee instead. Membership is bought
//! with SOL on chain or by card through Stripe, and both rails reconcile into
//! one record per wallet.

pub mod chain;
pub mod clock;
pub mod config;
pub mod errors;
pub mod fees;
pub mod membership;
pub mod metrics;
pub mod observability;
pub mod orchestrator;
pub mod server;
pub mod tx_builder;
pub mod types;
pub mod upload;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

#[cfg(test)]
mod tests;

pub use errors::FeeGateError;
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
