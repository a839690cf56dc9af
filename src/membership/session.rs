//! Caller-owned cache of one wallet's membership status
//!
//! Used for display and polling only. Fee resolution always reads the
//! backend directly.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use solana_sdk::pubkey::Pubkey;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{MembershipBackend, MembershipStatus, Plan};

#[derive(Debug)]
pub struct MembershipSession {
    wallet: Pubkey,
    state: RwLock<MembershipStatus>,
}

impl MembershipSession {
    pub fn new(wallet: Pubkey) -> Self {
        Self {
            wallet,
            state: RwLock::new(MembershipStatus::inactive()),
        }
    }

    pub fn wallet(&self) -> Pubkey {
        self.wallet
    }

    pub fn snapshot(&self) -> MembershipStatus {
        self.state.read().clone()
    }

    pub fn is_active(&self, now_ms: i64) -> bool {
        self.state.read().is_active_at(now_ms)
    }

    /// Reflect a purchase the caller just confirmed, ahead of the backend.
    pub fn apply_optimistic(&self, plan: Plan, now_ms: i64) -> MembershipStatus {
        let mut state = self.state.write();
        *state = MembershipStatus {
            is_active: true,
            expires_at: Some(now_ms + plan.duration_ms()),
            revision: state.revision + 1,
        };
        state.clone()
    }

    /// Apply a status read from the backend unless it is older than the
    /// cached one. Returns whether the cache changed.
    pub fn apply_fetched(&self, fetched: MembershipStatus) -> bool {
        let mut state = self.state.write();
        if fetched.revision < state.revision {
            debug!(
                wallet = %self.wallet,
                cached = state.revision,
                fetched = fetched.revision,
                "ignoring stale membership status"
            );
            return false;
        }
        *state = fetched;
        true
    }

    /// Refresh from `backend` every `interval` until the handle is aborted.
    pub fn spawn_poller(
        self: Arc<Self>,
        backend: Arc<dyn MembershipBackend>,
        interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match backend.fetch_status(&self.wallet).await {
                    Ok(status) => {
                        self.apply_fetched(status);
                    }
                    Err(err) => {
                        warn!(wallet = %self.wallet, error = %err, "membership poll failed; keeping cached status");
                    }
                }
            }
        })
    }
}
