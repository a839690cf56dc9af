//! Token orchestrator
//!
//! Each public method is one fee-gated action: validate, read chain state,
//! resolve the fee from a fresh membership read, plan instructions, compose
//! with the payment last, sign (generated keypairs first, wallet last),
//! submit and confirm.

pub mod amount;

use std::future::Future;
use std::sync::Arc;

use solana_sdk::{
    instruction::Instruction, pubkey::Pubkey, signature::Keypair, signature::Signature,
    signer::Signer,
};
use spl_associated_token_account::get_associated_token_address;
use spl_token::solana_program::program_pack::Pack;
use tracing::{info, warn, Instrument};

use crate::chain::accounts::{
    parse_metadata, parse_mint, parse_token_account, MintState, OnChainMetadata,
};
use crate::chain::wallet::WalletSigner;
use crate::chain::ChainClient;
use crate::clock::{Clock, SystemClock};
use crate::errors::FeeGateError;
use crate::fees::{resolve_fee, FeeAction, FeeSchedule};
use crate::membership::{MembershipBackend, Plan};
use crate::metrics::metrics;
use crate::observability::TraceContext;
use crate::tx_builder::builder::compose;
use crate::tx_builder::instructions::{
    plan_burn_instructions, plan_create_token_instructions, plan_revoke_authority_instructions,
    plan_update_metadata_instructions, CreateTokenPlan, InstructionPlan,
};
use crate::tx_builder::metadata_program::{
    find_metadata_address, DataV2, MAX_NAME_LENGTH, MAX_SYMBOL_LENGTH,
};
use crate::tx_builder::payment::{build_payment_instruction, Treasury};
use crate::tx_builder::submit::{SubmitPolicy, TransactionSubmitter};
use crate::types::{
    AuthorityKind, AuthorityVerification, BurnResult, CreateTokenRequest,
    MembershipPurchaseResult, MetadataUpdateRequest, MetadataUpdateResult, OperationReceipt,
    TokenCreationResult, TokenInfo, TokenMetadataDocument,
};
use crate::upload::{fetch_metadata_document, upload_token_metadata, validate_logo, AssetStore};
use amount::{parse_ui_amount, scale_supply};

pub const MAX_DECIMALS: u8 = 9;
pub const MAX_DESCRIPTION_LENGTH: usize = 1000;

pub struct TokenService {
    chain: Arc<dyn ChainClient>,
    wallet: Arc<dyn WalletSigner>,
    assets: Arc<dyn AssetStore>,
    membership: Arc<dyn MembershipBackend>,
    treasury: Treasury,
    schedule: FeeSchedule,
    submitter: TransactionSubmitter,
    clock: Arc<dyn Clock>,
    compute_unit_limit: Option<u32>,
}

impl TokenService {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        wallet: Arc<dyn WalletSigner>,
        assets: Arc<dyn AssetStore>,
        membership: Arc<dyn MembershipBackend>,
        treasury: Treasury,
        schedule: FeeSchedule,
        policy: SubmitPolicy,
    ) -> Self {
        Self {
            submitter: TransactionSubmitter::new(chain.clone(), policy),
            chain,
            wallet,
            assets,
            membership,
            treasury,
            schedule,
            clock: Arc::new(SystemClock),
            compute_unit_limit: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_compute_unit_limit(mut self, limit: Option<u32>) -> Self {
        self.compute_unit_limit = limit;
        self
    }

    pub fn wallet(&self) -> Pubkey {
        self.wallet.pubkey()
    }

    pub fn treasury(&self) -> &Treasury {
        &self.treasury
    }

    /// Fee for `action` from a membership read made right now.
    ///
    /// A failed read is logged and resolves as a non-member.
    pub async fn resolve_fee_for(&self, action: FeeAction) -> u64 {
        let wallet = self.wallet.pubkey();
        let membership = match self.membership.fetch_status(&wallet).await {
            Ok(status) => Some(status),
            Err(err) => {
                metrics().membership_lookup_failures.inc();
                warn!(wallet = %wallet, error = %err, "membership lookup failed; charging the full fee");
                None
            }
        };
        let now = self.clock.now_ms();
        let fee = resolve_fee(&action, membership.as_ref(), &self.schedule, now);

        let discounted = action.kind.is_discountable()
            && membership.as_ref().is_some_and(|m| m.is_active_at(now));
        if discounted && fee > 0 {
            metrics().fee_member_discounts.inc();
        }
        info!(action = action.kind.as_str(), fee_lamports = fee, member = discounted, "fee resolved");
        fee
    }

    fn payment_instruction(&self, fee: u64) -> Result<Option<Instruction>, FeeGateError> {
        if fee == 0 {
            return Ok(None);
        }
        build_payment_instruction(&self.wallet.pubkey(), &self.treasury, fee).map(Some)
    }

    /// Compose, sign and submit; rebuilt against a fresh blockhash on every
    /// attempt the submitter makes.
    async fn submit(
        &self,
        plan: InstructionPlan,
        payment: Option<&Instruction>,
        extra_signers: &[&Keypair],
    ) -> Result<Signature, FeeGateError> {
        let plan = plan.with_compute_unit_limit(self.compute_unit_limit);
        let plan = &plan;
        let payer = self.wallet.pubkey();

        self.submitter
            .execute(move || async move {
                let (blockhash, last_valid_block_height) = self.chain.latest_blockhash().await?;
                let mut composed = compose(
                    plan,
                    payment,
                    &payer,
                    extra_signers,
                    blockhash,
                    last_valid_block_height,
                )?;
                self.wallet.sign_transaction(&mut composed.tx).await?;
                Ok::<_, FeeGateError>(composed)
            })
            .await
    }

    fn charged(&self, fee: u64) {
        metrics().fees_charged_lamports.inc_by(fee);
    }

    async fn read_mint(&self, mint: &Pubkey) -> Result<MintState, FeeGateError> {
        let data = self
            .chain
            .account_data(mint)
            .await?
            .ok_or_else(|| FeeGateError::validation(format!("mint {mint} does not exist")))?;
        Ok(parse_mint(mint, &data)?)
    }

    async fn read_metadata(&self, mint: &Pubkey) -> Result<Option<OnChainMetadata>, FeeGateError> {
        let address = find_metadata_address(mint);
        match self.chain.account_data(&address).await? {
            Some(data) => Ok(Some(parse_metadata(&address, &data)?)),
            None => Ok(None),
        }
    }

    /// Metadata the wallet may still change
    async fn editable_metadata(&self, mint: &Pubkey) -> Result<OnChainMetadata, FeeGateError> {
        self.read_mint(mint).await?;
        let metadata = self.read_metadata(mint).await?.ok_or_else(|| {
            FeeGateError::validation(format!("mint {mint} has no metadata account"))
        })?;
        if !metadata.is_mutable {
            return Err(FeeGateError::MetadataImmutable {
                mint: mint.to_string(),
            });
        }
        let wallet = self.wallet.pubkey();
        if metadata.update_authority != wallet {
            return Err(FeeGateError::AuthorityMismatch(format!(
                "update authority of {mint} is {}, not {wallet}",
                metadata.update_authority
            )));
        }
        Ok(metadata)
    }

    async fn verify_authorities(&self, mint: &Pubkey) -> Option<AuthorityVerification> {
        let read = async {
            let state = self.read_mint(mint).await?;
            let metadata = self.read_metadata(mint).await?;
            Ok::<_, FeeGateError>(AuthorityVerification {
                mint_authority_revoked: state.mint_authority.is_none(),
                freeze_authority_revoked: state.freeze_authority.is_none(),
                metadata_locked: metadata.is_some_and(|m| !m.is_mutable),
            })
        };
        match read.await {
            Ok(verification) => Some(verification),
            Err(err) => {
                warn!(mint = %mint, error = %err, "could not verify authorities after creation");
                None
            }
        }
    }

    /// Upload metadata, then create, mint and configure a new token in one
    /// transaction.
    pub async fn create_token(
        &self,
        req: CreateTokenRequest,
    ) -> Result<TokenCreationResult, FeeGateError> {
        tracked("create_token", async {
            validate_name_symbol(&req.name, &req.symbol)?;
            validate_description(&req.description)?;
            if req.decimals > MAX_DECIMALS {
                return Err(FeeGateError::validation(format!(
                    "decimals must be between 0 and {MAX_DECIMALS}"
                )));
            }
            if req.initial_supply == 0 {
                return Err(FeeGateError::validation("initial supply must be greater than zero"));
            }
            let raw_supply = scale_supply(req.initial_supply, req.decimals).ok_or_else(|| {
                FeeGateError::validation(format!(
                    "supply {} with {} decimals exceeds the maximum token amount",
                    req.initial_supply, req.decimals
                ))
            })?;
            if let Some(logo) = &req.logo {
                validate_logo(&logo.bytes, &logo.content_type)?;
            }

            let name = req.name.trim().to_string();
            let symbol = req.symbol.trim().to_string();
            let document =
                TokenMetadataDocument::new(&name, &symbol, req.description.trim(), req.links.clone());
            let uris = upload_token_metadata(self.assets.as_ref(), req.logo.clone(), document).await?;

            let fee = self
                .resolve_fee_for(FeeAction::token_creation(req.premium_feature_count()))
                .await;
            let mint = Keypair::new();
            let rent_lamports = self
                .chain
                .minimum_balance_for_rent_exemption(spl_token::state::Mint::LEN)
                .await?;

            let plan = plan_create_token_instructions(&CreateTokenPlan {
                payer: self.wallet.pubkey(),
                mint: mint.pubkey(),
                decimals: req.decimals,
                raw_supply,
                rent_lamports,
                name: &name,
                symbol: &symbol,
                uri: &uris.metadata,
                revoke_mint: req.revoke_mint_authority,
                revoke_freeze: req.revoke_freeze_authority,
                lock_metadata: req.lock_metadata,
            })?;
            let payment = self.payment_instruction(fee)?;
            let signature = self.submit(plan, payment.as_ref(), &[&mint]).await?;
            self.charged(fee);

            let verifications = self.verify_authorities(&mint.pubkey()).await;
            info!(
                mint = %mint.pubkey(),
                signature = %signature,
                fee_lamports = fee,
                metadata_uri = %uris.metadata,
                "token created"
            );
            Ok(TokenCreationResult {
                mint: mint.pubkey(),
                signature,
                metadata_uri: uris.metadata,
                image_uri: uris.image,
                fee_lamports: fee,
                verifications,
            })
        })
        .await
    }

    /// Burn `amount` (decimal string) from the wallet's associated account.
    pub async fn burn_tokens(&self, mint: &Pubkey, amount: &str) -> Result<BurnResult, FeeGateError> {
        tracked("burn_tokens", async {
            let state = self.read_mint(mint).await?;
            let raw = parse_ui_amount(amount, state.decimals)?;

            let owner = self.wallet.pubkey();
            let ata = get_associated_token_address(&owner, mint);
            let available = match self.chain.account_data(&ata).await? {
                Some(data) => parse_token_account(&ata, &data)?.amount,
                None => 0,
            };
            if raw > available {
                return Err(FeeGateError::InsufficientTokenBalance {
                    requested: raw,
                    available,
                });
            }

            let fee = self.resolve_fee_for(FeeAction::burn()).await;
            let plan = plan_burn_instructions(&owner, mint, raw, state.decimals)?;
            let payment = self.payment_instruction(fee)?;
            let signature = self.submit(plan, payment.as_ref(), &[]).await?;
            self.charged(fee);

            info!(mint = %mint, signature = %signature, burned_raw = raw, "tokens burned");
            Ok(BurnResult {
                signature,
                burned_raw: raw,
                decimals: state.decimals,
                fee_lamports: fee,
            })
        })
        .await
    }

    /// Rewrite the off-chain document and point the on-chain metadata at it.
    pub async fn update_metadata(
        &self,
        req: MetadataUpdateRequest,
    ) -> Result<MetadataUpdateResult, FeeGateError> {
        tracked("update_metadata", async {
            let mint = req.mint;
            let current = self.editable_metadata(&mint).await?;

            if let Some(name) = &req.name {
                validate_name_symbol(name, req.symbol.as_deref().unwrap_or(&current.symbol))?;
            } else if let Some(symbol) = &req.symbol {
                validate_name_symbol(&current.name, symbol)?;
            }
            if let Some(description) = &req.description {
                validate_description(description)?;
            }
            if let Some(logo) = &req.logo {
                validate_logo(&logo.bytes, &logo.content_type)?;
            }
            let changes_data = req.name.is_some()
                || req.symbol.is_some()
                || req.description.is_some()
                || req.logo.is_some()
                || req.links.is_some();
            if !changes_data && !req.make_immutable {
                return Err(FeeGateError::validation("metadata update changes nothing"));
            }

            let mut document = match fetch_metadata_document(self.assets.as_ref(), &current.uri).await {
                Ok(document) => document,
                Err(err) => {
                    warn!(mint = %mint, uri = %current.uri, error = %err, "current metadata document unavailable; rebuilding from chain");
                    TokenMetadataDocument::new(&current.name, &current.symbol, "", Default::default())
                }
            };
            if let Some(name) = &req.name {
                document.name = name.trim().to_string();
            }
            if let Some(symbol) = &req.symbol {
                document.symbol = symbol.trim().to_string();
            }
            if let Some(description) = &req.description {
                document.description = description.trim().to_string();
            }
            if let Some(links) = &req.links {
                document.properties.links = document.properties.links.merged_with(links);
            }

            let uris = upload_token_metadata(self.assets.as_ref(), req.logo.clone(), document).await?;
            let mut data = DataV2::new(&uris.document.name, &uris.document.symbol, &uris.metadata);
            data.seller_fee_basis_points = current.seller_fee_basis_points;

            let fee = self.resolve_fee_for(FeeAction::metadata_update()).await;
            let plan = plan_update_metadata_instructions(
                &mint,
                &self.wallet.pubkey(),
                Some(data),
                req.make_immutable,
            )?;
            let payment = self.payment_instruction(fee)?;
            let signature = self.submit(plan, payment.as_ref(), &[]).await?;
            self.charged(fee);

            info!(
                mint = %mint,
                signature = %signature,
                metadata_uri = %uris.metadata,
                locked = req.make_immutable,
                "metadata updated"
            );
            Ok(MetadataUpdateResult {
                signature,
                metadata_uri: uris.metadata,
                fee_lamports: fee,
            })
        })
        .await
    }

    /// Set `is_mutable = false`. There is no way back.
    pub async fn make_immutable(&self, mint: &Pubkey) -> Result<OperationReceipt, FeeGateError> {
        tracked("make_immutable", async {
            self.editable_metadata(mint).await?;

            let fee = self.resolve_fee_for(FeeAction::metadata_update()).await;
            let plan = plan_update_metadata_instructions(mint, &self.wallet.pubkey(), None, true)?;
            let payment = self.payment_instruction(fee)?;
            let signature = self.submit(plan, payment.as_ref(), &[]).await?;
            self.charged(fee);

            info!(mint = %mint, signature = %signature, "metadata locked");
            Ok(OperationReceipt {
                signature,
                fee_lamports: fee,
            })
        })
        .await
    }

    pub async fn revoke_authority(
        &self,
        mint: &Pubkey,
        kind: AuthorityKind,
    ) -> Result<OperationReceipt, FeeGateError> {
        tracked("revoke_authority", async {
            let state = self.read_mint(mint).await?;
            let current = match kind {
                AuthorityKind::Mint => state.mint_authority,
                AuthorityKind::Freeze => state.freeze_authority,
            };
            let wallet = self.wallet.pubkey();
            match current {
                None => {
                    return Err(FeeGateError::validation(format!(
                        "{} authority of {mint} is already revoked",
                        kind.as_str()
                    )))
                }
                Some(authority) if authority != wallet => {
                    return Err(FeeGateError::AuthorityMismatch(format!(
                        "{} authority of {mint} is {authority}, not {wallet}",
                        kind.as_str()
                    )))
                }
                Some(_) => {}
            }

            let fee = self.resolve_fee_for(FeeAction::revoke(kind)).await;
            let plan = plan_revoke_authority_instructions(mint, &wallet, kind)?;
            let payment = self.payment_instruction(fee)?;
            let signature = self.submit(plan, payment.as_ref(), &[]).await?;
            self.charged(fee);

            info!(mint = %mint, signature = %signature, authority = kind.as_str(), "authority revoked");
            Ok(OperationReceipt {
                signature,
                fee_lamports: fee,
            })
        })
        .await
    }

    /// Pay the plan price to the treasury, then record the purchase.
    pub async fn purchase_membership(
        &self,
        plan: Plan,
    ) -> Result<MembershipPurchaseResult, FeeGateError> {
        tracked("purchase_membership", async {
            let fee = self.resolve_fee_for(FeeAction::membership(plan)).await;
            let payment = self.payment_instruction(fee)?.ok_or_else(|| {
                FeeGateError::internal(format!("plan {plan} resolved to a zero price"))
            })?;
            let signature = self
                .submit(InstructionPlan::default(), Some(&payment), &[])
                .await?;
            self.charged(fee);

            let wallet = self.wallet.pubkey();
            let status = self
                .membership
                .record_onchain_purchase(&wallet, plan, &signature.to_string())
                .await
                .map_err(|err| {
                    warn!(
                        wallet = %wallet,
                        signature = %signature,
                        error = %err,
                        "payment confirmed but membership was not recorded"
                    );
                    err
                })?;

            info!(wallet = %wallet, plan = %plan, signature = %signature, expires_at = status.expires_at, "membership purchased");
            Ok(MembershipPurchaseResult {
                plan,
                signature,
                fee_lamports: fee,
                status,
            })
        })
        .await
    }

    /// On-chain mint and metadata plus the off-chain document, when reachable.
    pub async fn token_info(&self, mint: &Pubkey) -> Result<TokenInfo, FeeGateError> {
        let mint_state = self.read_mint(mint).await?;
        let metadata = self.read_metadata(mint).await?;
        let document = match &metadata {
            Some(meta) => match fetch_metadata_document(self.assets.as_ref(), &meta.uri).await {
                Ok(document) => Some(document),
                Err(err) => {
                    warn!(mint = %mint, uri = %meta.uri, error = %err, "metadata document unavailable");
                    None
                }
            },
            None => None,
        };
        Ok(TokenInfo {
            mint: *mint,
            mint_state,
            metadata,
            document,
        })
    }
}

/// Run one action inside its trace span and count the outcome.
async fn tracked<T, F>(action: &'static str, fut: F) -> Result<T, FeeGateError>
where
    F: Future<Output = Result<T, FeeGateError>>,
{
    let ctx = TraceContext::new(action);
    let result = fut.instrument(ctx.span()).await;
    match &result {
        Ok(_) => metrics().record_action(action, "success"),
        Err(err) => {
            metrics().record_action(action, err.category());
            warn!(
                action,
                correlation_id = %ctx.correlation_id,
                category = err.category(),
                error = %err,
                "action failed"
            );
        }
    }
    result
}

fn validate_name_symbol(name: &str, symbol: &str) -> Result<(), FeeGateError> {
    let name = name.trim();
    let symbol = symbol.trim();
    if name.is_empty() {
        return Err(FeeGateError::validation("token name is required"));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(FeeGateError::validation(format!(
            "token name must be at most {MAX_NAME_LENGTH} bytes"
        )));
    }
    if symbol.is_empty() {
        return Err(FeeGateError::validation("token symbol is required"));
    }
    if symbol.len() > MAX_SYMBOL_LENGTH {
        return Err(FeeGateError::validation(format!(
            "token symbol must be at most {MAX_SYMBOL_LENGTH} bytes"
        )));
    }
    Ok(())
}

fn validate_description(description: &str) -> Result<(), FeeGateError> {
    if description.trim().chars().count() > MAX_DESCRIPTION_LENGTH {
        return Err(FeeGateError::validation(format!(
            "description must be at most {MAX_DESCRIPTION_LENGTH} characters"
        )));
    }
    Ok(())
}
