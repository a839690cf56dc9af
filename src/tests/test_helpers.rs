//! Shared fixtures: a token service wired to a mock chain, an in-memory asset
//! store and an in-memory membership service on a manual clock.

use std::sync::Arc;
use std::time::Duration;

use solana_sdk::{pubkey::Pubkey, signature::Keypair, signer::Signer, transaction::Transaction};

use crate::chain::accounts::{MintState, OnChainMetadata};
use crate::chain::wallet::KeypairWallet;
use crate::clock::ManualClock;
use crate::fees::FeeSchedule;
use crate::membership::service::MembershipService;
use crate::membership::store::InMemoryMembershipStore;
use crate::orchestrator::TokenService;
use crate::test_utils::MockChain;
use crate::tx_builder::instructions::{classify_instruction, OperationStep};
use crate::tx_builder::output::ComposedTransaction;
use crate::tx_builder::payment::Treasury;
use crate::tx_builder::submit::SubmitPolicy;
use crate::types::{CreateTokenRequest, LogoFile, SocialLinks};
use crate::upload::memory::InMemoryAssetStore;

pub const T0: i64 = 1_700_000_000_000;

pub fn fast_policy() -> SubmitPolicy {
    SubmitPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        poll_interval: Duration::from_millis(5),
        confirm_timeout: Duration::from_secs(5),
    }
}

pub struct Harness {
    pub chain: Arc<MockChain>,
    pub wallet: Pubkey,
    pub treasury: Pubkey,
    pub assets: Arc<InMemoryAssetStore>,
    pub store: Arc<InMemoryMembershipStore>,
    pub membership: Arc<MembershipService>,
    pub clock: ManualClock,
    pub service: TokenService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(fast_policy())
    }

    pub fn with_policy(policy: SubmitPolicy) -> Self {
        let chain = Arc::new(MockChain::new());
        let keypair = Keypair::new();
        let wallet = keypair.pubkey();
        let treasury = Pubkey::new_unique();
        let assets = Arc::new(InMemoryAssetStore::new());
        let store = Arc::new(InMemoryMembershipStore::new());
        let clock = ManualClock::new(T0);
        let membership = Arc::new(MembershipService::new(store.clone(), Arc::new(clock.clone())));

        let service = TokenService::new(
            chain.clone(),
            Arc::new(KeypairWallet::from_keypair(keypair)),
            assets.clone(),
            membership.clone(),
            Treasury::from_pubkey(treasury).unwrap(),
            FeeSchedule::default(),
            policy,
        )
        .with_clock(Arc::new(clock.clone()));

        Self {
            chain,
            wallet,
            treasury,
            assets,
            store,
            membership,
            clock,
            service,
        }
    }

    /// A mint whose authorities are all held by the harness wallet
    pub fn seed_owned_mint(&self, decimals: u8, balance: u64) -> Pubkey {
        let mint = Pubkey::new_unique();
        self.chain.seed_mint(
            &mint,
            &MintState {
                decimals,
                supply: balance,
                mint_authority: Some(self.wallet),
                freeze_authority: Some(self.wallet),
            },
        );
        self.chain.seed_token_balance(&self.wallet, &mint, balance);
        mint
    }

    pub fn seed_metadata(&self, mint: &Pubkey, update_authority: Pubkey, is_mutable: bool) {
        self.chain.seed_metadata(&OnChainMetadata {
            update_authority,
            mint: *mint,
            name: "Seeded".to_string(),
            symbol: "SEED".to_string(),
            uri: "memory://missing".to_string(),
            seller_fee_basis_points: 0,
            primary_sale_happened: false,
            is_mutable,
        });
    }
}

pub fn create_request(revoke_mint: bool, revoke_freeze: bool, lock_metadata: bool) -> CreateTokenRequest {
    CreateTokenRequest {
        name: "Test Token".to_string(),
        symbol: "TST".to_string(),
        decimals: 9,
        initial_supply: 1_000_000,
        description: "A token for tests".to_string(),
        logo: None,
        links: SocialLinks {
            website: Some("https://example.org".to_string()),
            ..Default::default()
        },
        revoke_mint_authority: revoke_mint,
        revoke_freeze_authority: revoke_freeze,
        lock_metadata,
    }
}

pub fn png_logo() -> LogoFile {
    LogoFile {
        bytes: vec![0x89, b'P', b'N', b'G', 0, 1, 2, 3],
        file_name: "logo.png".to_string(),
        content_type: "image/png".to_string(),
    }
}

/// Operation steps of a sent transaction, in order
pub fn steps_of(tx: &Transaction) -> Vec<OperationStep> {
    ComposedTransaction::new(tx.clone(), 0)
        .instructions()
        .iter()
        .map(classify_instruction)
        .collect()
}
