//! Membership: one record per wallet, reconciled from two payment rails
//!
//! - `plan`: the pricing table
//! - `store`: persistence (`FileMembershipStore`, `InMemoryMembershipStore`)
//! - `service`: activation, idempotency and on-chain payment verification
//! - `session`: a caller-owned cache of the last known status
//! - `client`: HTTP access to a remote membership service

pub mod client;
pub mod plan;
pub mod service;
pub mod session;
pub mod store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::errors::FeeGateError;
pub use plan::Plan;

/// Membership state as served to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipStatus {
    pub is_active: bool,
    /// Unix milliseconds; `None` when the wallet never purchased
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub revision: u64,
}

impl MembershipStatus {
    pub fn inactive() -> Self {
        Self {
            is_active: false,
            expires_at: None,
            revision: 0,
        }
    }

    /// Active iff the expiry is strictly in the future
    pub fn is_active_at(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at > now_ms)
    }
}

/// How a purchase was paid, for activation bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseProof {
    /// Signature of a confirmed SOL transfer to the treasury
    OnChain(String),
    /// Completed card checkout session id
    Checkout(String),
    /// Caller vouches for the payment (no verification possible)
    Unverified,
}

impl PurchaseProof {
    pub fn reference(&self) -> Option<&str> {
        match self {
            PurchaseProof::OnChain(sig) => Some(sig),
            PurchaseProof::Checkout(id) => Some(id),
            PurchaseProof::Unverified => None,
        }
    }

    pub fn rail(&self) -> &'static str {
        match self {
            PurchaseProof::OnChain(_) => "onchain",
            PurchaseProof::Checkout(_) => "card",
            PurchaseProof::Unverified => "unverified",
        }
    }
}

/// Where fee-gated actions read membership and where purchases are recorded
#[async_trait]
pub trait MembershipBackend: Send + Sync {
    async fn fetch_status(&self, wallet: &Pubkey) -> Result<MembershipStatus, FeeGateError>;

    /// Record a confirmed on-chain purchase
    async fn record_onchain_purchase(
        &self,
        wallet: &Pubkey,
        plan: Plan,
        signature: &str,
    ) -> Result<MembershipStatus, FeeGateError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_json_shape() {
        let status = MembershipStatus {
            is_active: true,
            expires_at: Some(1_700_000_000_000),
            revision: 2,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["isActive"], true);
        assert_eq!(json["expiresAt"], 1_700_000_000_000i64);
        assert_eq!(json["revision"], 2);

        let inactive = serde_json::to_value(MembershipStatus::inactive()).unwrap();
        assert!(inactive["expiresAt"].is_null());
    }

    #[test]
    fn test_expiry_boundary() {
        let status = MembershipStatus {
            is_active: true,
            expires_at: Some(1_000),
            revision: 1,
        };
        assert!(status.is_active_at(999));
        assert!(!status.is_active_at(1_000));
        assert!(!MembershipStatus::inactive().is_active_at(0));
    }
}
