//! Membership reconciliation
//!
//! Both payment rails end in [`MembershipService::activate`]. Activation
//! overwrites the expiry with `now + plan duration`; a purchase reference
//! that was already applied to the wallet is a redelivery and changes
//! nothing. Writes
//! for one wallet are serialized; different wallets never contend.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::store::{MembershipRecord, MembershipStore, StoreError};
use super::{MembershipBackend, MembershipStatus, Plan, PurchaseProof};
use crate::chain::ChainClient;
use crate::clock::Clock;
use crate::errors::FeeGateError;
use crate::metrics::metrics;
use crate::tx_builder::payment::Treasury;

/// Checks on-chain membership payments before activation
#[derive(Clone)]
pub struct PaymentVerifier {
    chain: Arc<dyn ChainClient>,
    treasury: Treasury,
}

impl PaymentVerifier {
    pub fn new(chain: Arc<dyn ChainClient>, treasury: Treasury) -> Self {
        Self { chain, treasury }
    }

    /// Require a successful transfer of at least the plan price from
    /// `wallet` to the treasury in the confirmed transaction.
    pub async fn verify(
        &self,
        wallet: &Pubkey,
        plan: Plan,
        signature: &str,
    ) -> Result<(), FeeGateError> {
        let sig = Signature::from_str(signature)
            .map_err(|_| FeeGateError::validation(format!("invalid transaction signature {signature:?}")))?;

        let confirmed = self
            .chain
            .confirmed_transaction(&sig)
            .await?
            .ok_or_else(|| {
                FeeGateError::validation(format!("transaction {signature} is not confirmed"))
            })?;
        if !confirmed.succeeded {
            return Err(FeeGateError::validation(format!(
                "transaction {signature} failed on chain"
            )));
        }

        let price = plan.sol_price_lamports();
        let treasury = self.treasury.pubkey();
        let paid = confirmed
            .transfers
            .iter()
            .any(|t| t.from == *wallet && t.to == treasury && t.lamports >= price);
        if !paid {
            return Err(FeeGateError::validation(format!(
                "transaction {signature} does not pay {price} lamports from {wallet} to the treasury"
            )));
        }
        Ok(())
    }
}

pub struct MembershipService {
    store: Arc<dyn MembershipStore>,
    clock: Arc<dyn Clock>,
    locks: DashMap<Pubkey, Arc<Mutex<()>>>,
    verifier: Option<PaymentVerifier>,
}

impl MembershipService {
    pub fn new(store: Arc<dyn MembershipStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            locks: DashMap::new(),
            verifier: None,
        }
    }

    pub fn with_payment_verifier(mut self, verifier: PaymentVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn verifies_onchain_payments(&self) -> bool {
        self.verifier.is_some()
    }

    fn status_from(&self, record: &MembershipRecord) -> MembershipStatus {
        let status = MembershipStatus {
            is_active: false,
            expires_at: record.expires_at,
            revision: record.revision,
        };
        MembershipStatus {
            is_active: status.is_active_at(self.clock.now_ms()),
            ..status
        }
    }

    /// Current status; any storage failure is an error
    pub async fn try_get_status(&self, wallet: &Pubkey) -> Result<MembershipStatus, FeeGateError> {
        match self.store.load(wallet).await {
            Ok(Some(record)) => Ok(self.status_from(&record)),
            Ok(None) => Ok(MembershipStatus::inactive()),
            Err(err) => Err(FeeGateError::MembershipLookup(err.to_string())),
        }
    }

    /// Current status; storage failures read as inactive
    pub async fn get_status(&self, wallet: &Pubkey) -> MembershipStatus {
        match self.try_get_status(wallet).await {
            Ok(status) => status,
            Err(err) => {
                metrics().membership_lookup_failures.inc();
                warn!(wallet = %wallet, error = %err, "membership read failed; treating as inactive");
                MembershipStatus::inactive()
            }
        }
    }

    fn wallet_lock(&self, wallet: &Pubkey) -> Arc<Mutex<()>> {
        self.locks.entry(*wallet).or_default().clone()
    }

    /// Activate `plan` for `wallet` as of now.
    pub async fn activate(
        &self,
        wallet: &Pubkey,
        plan: Plan,
        proof: PurchaseProof,
    ) -> Result<MembershipStatus, FeeGateError> {
        let lock = self.wallet_lock(wallet);
        let _guard = lock.lock().await;

        let current = match self.store.load(wallet).await {
            Ok(current) => current,
            Err(StoreError::Corrupt(e)) => {
                warn!(wallet = %wallet, error = %e, "replacing corrupt membership record");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let purchase_ref = proof.reference();
        if let (Some(existing), Some(incoming)) = (&current, purchase_ref) {
            if existing.has_applied(incoming) {
                metrics().membership_duplicate_purchases.inc();
                info!(wallet = %wallet, purchase_ref = incoming, "purchase already applied");
                return Ok(self.status_from(existing));
            }
        }

        let mut applied_refs = current
            .as_ref()
            .map(|r| r.applied_refs.clone())
            .unwrap_or_default();
        // records written before the ref list existed
        if let Some(last) = current.as_ref().and_then(|r| r.purchase_ref.clone()) {
            if !applied_refs.contains(&last) {
                applied_refs.push(last);
            }
        }
        applied_refs.extend(purchase_ref.map(str::to_owned));

        let now = self.clock.now_ms();
        let record = MembershipRecord {
            is_active: true,
            expires_at: Some(now + plan.duration_ms()),
            revision: current.as_ref().map_or(0, |r| r.revision) + 1,
            purchase_ref: purchase_ref.map(str::to_owned),
            applied_refs,
        };
        self.store.save(wallet, &record).await?;

        metrics()
            .membership_activations
            .with_label_values(&[proof.rail()])
            .inc();
        info!(
            wallet = %wallet,
            plan = %plan,
            rail = proof.rail(),
            expires_at = record.expires_at,
            revision = record.revision,
            "membership activated"
        );
        Ok(self.status_from(&record))
    }

    /// On-chain rail: verify the payment transaction, then activate.
    pub async fn confirm_onchain_purchase(
        &self,
        wallet: &Pubkey,
        plan: Plan,
        signature: &str,
    ) -> Result<MembershipStatus, FeeGateError> {
        let verifier = self.verifier.as_ref().ok_or_else(|| {
            FeeGateError::config("on-chain payment verification is not configured")
        })?;
        verifier.verify(wallet, plan, signature).await?;
        self.activate(wallet, plan, PurchaseProof::OnChain(signature.to_string()))
            .await
    }
}

#[async_trait]
impl MembershipBackend for MembershipService {
    async fn fetch_status(&self, wallet: &Pubkey) -> Result<MembershipStatus, FeeGateError> {
        self.try_get_status(wallet).await
    }

    async fn record_onchain_purchase(
        &self,
        wallet: &Pubkey,
        plan: Plan,
        signature: &str,
    ) -> Result<MembershipStatus, FeeGateError> {
        if self.verifies_onchain_payments() {
            self.confirm_onchain_purchase(wallet, plan, signature).await
        } else {
            self.activate(wallet, plan, PurchaseProof::OnChain(signature.to_string()))
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::membership::store::InMemoryMembershipStore;
    use std::time::Duration;

    const T0: i64 = 1_700_000_000_000;
    const DAY_MS: i64 = 86_400_000;

    fn service() -> (MembershipService, ManualClock, Arc<InMemoryMembershipStore>) {
        let clock = ManualClock::new(T0);
        let store = Arc::new(InMemoryMembershipStore::new());
        let svc = MembershipService::new(store.clone(), Arc::new(clock.clone()));
        (svc, clock, store)
    }

    #[tokio::test]
    async fn test_never_purchased_is_inactive() {
        let (svc, _, _) = service();
        let status = svc.get_status(&Pubkey::new_unique()).await;
        assert_eq!(status, MembershipStatus::inactive());
    }

    #[tokio::test]
    async fn test_activation_sets_expiry_from_now() {
        let (svc, _, _) = service();
        let wallet = Pubkey::new_unique();
        let status = svc
            .activate(&wallet, Plan::Weekly, PurchaseProof::Checkout("cs_1".to_string()))
            .await
            .unwrap();
        assert!(status.is_active);
        assert_eq!(status.expires_at, Some(T0 + 7 * DAY_MS));
        assert_eq!(status.revision, 1);
    }

    #[tokio::test]
    async fn test_redelivered_purchase_is_idempotent() {
        let (svc, clock, _) = service();
        let wallet = Pubkey::new_unique();
        let proof = PurchaseProof::Checkout("cs_dup".to_string());

        let first = svc.activate(&wallet, Plan::Weekly, proof.clone()).await.unwrap();
        clock.advance(Duration::from_secs(3600));
        let second = svc.activate(&wallet, Plan::Weekly, proof).await.unwrap();

        assert_eq!(second.expires_at, first.expires_at);
        assert_eq!(second.revision, first.revision);
    }

    #[tokio::test]
    async fn test_distinct_purchases_overwrite_not_extend() {
        let (svc, clock, _) = service();
        let wallet = Pubkey::new_unique();

        svc.activate(&wallet, Plan::Weekly, PurchaseProof::Checkout("cs_a".to_string()))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(60));
        let status = svc
            .activate(&wallet, Plan::Weekly, PurchaseProof::Checkout("cs_b".to_string()))
            .await
            .unwrap();

        assert_eq!(status.expires_at, Some(T0 + 60_000 + 7 * DAY_MS));
        assert_eq!(status.revision, 2);
    }

    #[tokio::test]
    async fn test_earlier_purchase_redelivered_after_newer_one() {
        let (svc, clock, store) = service();
        let wallet = Pubkey::new_unique();

        svc.activate(&wallet, Plan::Weekly, PurchaseProof::Checkout("cs_a".to_string()))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(86_400));
        let after_b = svc
            .activate(&wallet, Plan::Weekly, PurchaseProof::Checkout("cs_b".to_string()))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(3 * 86_400));
        let redelivered = svc
            .activate(&wallet, Plan::Weekly, PurchaseProof::Checkout("cs_a".to_string()))
            .await
            .unwrap();
        assert_eq!(redelivered.expires_at, after_b.expires_at);
        assert_eq!(redelivered.revision, 2);

        let record = store.get(&wallet).unwrap();
        assert_eq!(record.purchase_ref.as_deref(), Some("cs_b"));
        assert_eq!(record.applied_refs, vec!["cs_a".to_string(), "cs_b".to_string()]);
    }

    #[tokio::test]
    async fn test_expiry_is_strict() {
        let (svc, clock, _) = service();
        let wallet = Pubkey::new_unique();
        svc.activate(&wallet, Plan::Weekly, PurchaseProof::Unverified)
            .await
            .unwrap();

        clock.set(T0 + 7 * DAY_MS - 1);
        assert!(svc.get_status(&wallet).await.is_active);
        clock.set(T0 + 7 * DAY_MS);
        let status = svc.get_status(&wallet).await;
        assert!(!status.is_active);
        assert_eq!(status.expires_at, Some(T0 + 7 * DAY_MS));
    }

    #[tokio::test]
    async fn test_reads_fail_closed() {
        let (svc, _, store) = service();
        let wallet = Pubkey::new_unique();
        svc.activate(&wallet, Plan::Monthly, PurchaseProof::Unverified)
            .await
            .unwrap();

        store.set_fail_reads(true);
        assert!(!svc.get_status(&wallet).await.is_active);
        assert!(matches!(
            svc.fetch_status(&wallet).await,
            Err(FeeGateError::MembershipLookup(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_activations_for_one_wallet_serialize() {
        let (svc, _, store) = service();
        let svc = Arc::new(svc);
        let wallet = Pubkey::new_unique();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let svc = svc.clone();
                tokio::spawn(async move {
                    svc.activate(&wallet, Plan::Weekly, PurchaseProof::Checkout(format!("cs_{i}")))
                        .await
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(store.get(&wallet).unwrap().revision, 8);
    }

    #[tokio::test]
    async fn test_onchain_confirmation_requires_verifier() {
        let (svc, _, _) = service();
        let err = svc
            .confirm_onchain_purchase(&Pubkey::new_unique(), Plan::Weekly, "sig")
            .await
            .unwrap_err();
        assert!(matches!(err, FeeGateError::Configuration(_)));
    }
}
