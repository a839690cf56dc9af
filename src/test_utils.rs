//! Test utilities
//!
//! [`MockChain`] is an in-process ledger that executes the instructions this
//! service emits (system create/transfer, SPL token mint/authority/burn,
//! associated account creation, token metadata create/update). Transactions
//! are checked for valid signatures, executed atomically and either applied
//! or rejected with the same error shapes a node returns.
//!
//! Only compiled for tests or with the `test_utils` feature.

#![cfg(any(test, feature = "test_utils"))]

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use solana_sdk::{
    compute_budget,
    hash::Hash,
    instruction::{Instruction, InstructionError},
    pubkey::Pubkey,
    signature::Signature,
    system_instruction, system_program,
    transaction::{Transaction, TransactionError, VersionedTransaction},
};
use spl_associated_token_account::get_associated_token_address;
use spl_token::instruction::{AuthorityType, TokenInstruction};
use spl_token::solana_program::program_option::COption;
use spl_token::solana_program::program_pack::Pack;
use spl_token::state::{Account as SplAccount, AccountState, Mint as SplMint};

use crate::chain::accounts::{encode_metadata_account, parse_metadata, MintState, OnChainMetadata};
use crate::chain::{system_transfers, ChainClient, ChainError, ConfirmedTransaction, SignatureState};
use crate::tx_builder::output::ComposedTransaction;
use crate::tx_builder::metadata_program::{
    decode_create_args, decode_update_args, find_metadata_address, TOKEN_METADATA_PROGRAM_ID,
};

/// Blocks a blockhash stays valid for
pub const BLOCKHASH_VALIDITY: u64 = 150;

// spl-token error codes
const TOKEN_INSUFFICIENT_FUNDS: u32 = 1;
const TOKEN_OWNER_MISMATCH: u32 = 4;
const TOKEN_FIXED_SUPPLY: u32 = 5;
const TOKEN_ALREADY_IN_USE: u32 = 6;
const TOKEN_MINT_CANNOT_FREEZE: u32 = 16;
const TOKEN_DECIMALS_MISMATCH: u32 = 18;
// token metadata error codes
const METADATA_UPDATE_AUTHORITY_INCORRECT: u32 = 7;
const METADATA_DATA_IS_IMMUTABLE: u32 = 39;

#[derive(Default, Clone)]
struct Ledger {
    accounts: HashMap<Pubkey, Vec<u8>>,
    lamports: HashMap<Pubkey, u64>,
}

struct MockState {
    ledger: Ledger,
    block_height: u64,
    sent: Vec<Transaction>,
    statuses: HashMap<Signature, SignatureState>,
    confirmed: HashMap<Signature, ConfirmedTransaction>,
    reject_queue: VecDeque<ChainError>,
    auto_confirm: bool,
    fail_account_reads: bool,
}

/// In-process ledger implementing [`ChainClient`]
pub struct MockChain {
    state: Mutex<MockState>,
    rent_per_byte: u64,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                ledger: Ledger::default(),
                block_height: 1_000,
                sent: Vec::new(),
                statuses: HashMap::new(),
                confirmed: HashMap::new(),
                reject_queue: VecDeque::new(),
                auto_confirm: true,
                fail_account_reads: false,
            }),
            rent_per_byte: 6_960,
        }
    }

    /// Reject the next `send_transaction` with `err` without executing it
    pub fn reject_next(&self, err: ChainError) {
        self.state.lock().reject_queue.push_back(err);
    }

    pub fn expire_next_blockhash(&self) {
        self.reject_next(ChainError::Rejected {
            error: Some(TransactionError::BlockhashNotFound),
            detail: "Blockhash not found".to_string(),
        });
    }

    /// When off, accepted transactions stay pending forever
    pub fn set_auto_confirm(&self, on: bool) {
        self.state.lock().auto_confirm = on;
    }

    pub fn set_fail_account_reads(&self, on: bool) {
        self.state.lock().fail_account_reads = on;
    }

    pub fn set_block_height(&self, height: u64) {
        self.state.lock().block_height = height;
    }

    /// Every transaction that reached `send_transaction`, rejected or not
    pub fn sent_transactions(&self) -> Vec<Transaction> {
        self.state.lock().sent.clone()
    }

    pub fn lamports(&self, address: &Pubkey) -> u64 {
        self.state
            .lock()
            .ledger
            .lamports
            .get(address)
            .copied()
            .unwrap_or_default()
    }

    pub fn seed_mint(&self, mint: &Pubkey, state: &MintState) {
        let spl = SplMint {
            mint_authority: to_coption(state.mint_authority),
            supply: state.supply,
            decimals: state.decimals,
            is_initialized: true,
            freeze_authority: to_coption(state.freeze_authority),
        };
        let mut data = vec![0u8; SplMint::LEN];
        SplMint::pack(spl, &mut data).expect("mint packs");
        self.state.lock().ledger.accounts.insert(*mint, data);
    }

    /// Create or overwrite `owner`'s associated account for `mint`
    pub fn seed_token_balance(&self, owner: &Pubkey, mint: &Pubkey, amount: u64) {
        let ata = get_associated_token_address(owner, mint);
        let data = pack_token_account(mint, owner, amount);
        self.state.lock().ledger.accounts.insert(ata, data);
    }

    pub fn seed_metadata(&self, metadata: &OnChainMetadata) {
        let address = find_metadata_address(&metadata.mint);
        self.state
            .lock()
            .ledger
            .accounts
            .insert(address, encode_metadata_account(metadata));
    }

    /// Record a confirmed payment-only transaction, as if sent by another client
    pub fn seed_confirmed_transfer(&self, from: &Pubkey, to: &Pubkey, lamports: u64) -> Signature {
        let ix = system_instruction::transfer(from, to, lamports);
        let tx = Transaction::new_with_payer(&[ix], Some(from));
        let signature = Signature::new_unique();
        let mut state = self.state.lock();
        state.confirmed.insert(
            signature,
            ConfirmedTransaction {
                succeeded: true,
                transfers: system_transfers(&VersionedTransaction::from(tx)),
            },
        );
        state.statuses.insert(signature, SignatureState::Confirmed);
        signature
    }

    pub fn mint_state(&self, mint: &Pubkey) -> Option<MintState> {
        let state = self.state.lock();
        let data = state.ledger.accounts.get(mint)?;
        crate::chain::accounts::parse_mint(mint, data).ok()
    }

    pub fn token_balance(&self, owner: &Pubkey, mint: &Pubkey) -> Option<u64> {
        let ata = get_associated_token_address(owner, mint);
        let state = self.state.lock();
        let data = state.ledger.accounts.get(&ata)?;
        SplAccount::unpack(data).ok().map(|a| a.amount)
    }

    pub fn metadata(&self, mint: &Pubkey) -> Option<OnChainMetadata> {
        let address = find_metadata_address(mint);
        let state = self.state.lock();
        let data = state.ledger.accounts.get(&address)?;
        parse_metadata(&address, data).ok()
    }
}

fn to_coption(key: Option<Pubkey>) -> COption<Pubkey> {
    match key {
        Some(key) => COption::Some(key),
        None => COption::None,
    }
}

fn pack_token_account(mint: &Pubkey, owner: &Pubkey, amount: u64) -> Vec<u8> {
    let account = SplAccount {
        mint: *mint,
        owner: *owner,
        amount,
        state: AccountState::Initialized,
        ..SplAccount::default()
    };
    let mut data = vec![0u8; SplAccount::LEN];
    SplAccount::pack(account, &mut data).expect("token account packs");
    data
}

type IxResult = Result<(), InstructionError>;

fn account_at(ix: &Instruction, idx: usize) -> Result<Pubkey, InstructionError> {
    ix.accounts
        .get(idx)
        .map(|meta| meta.pubkey)
        .ok_or(InstructionError::NotEnoughAccountKeys)
}

fn require_signer(ix: &Instruction, idx: usize) -> IxResult {
    match ix.accounts.get(idx) {
        Some(meta) if meta.is_signer => Ok(()),
        Some(_) => Err(InstructionError::MissingRequiredSignature),
        None => Err(InstructionError::NotEnoughAccountKeys),
    }
}

impl Ledger {
    fn execute(&mut self, ix: &Instruction) -> IxResult {
        if ix.program_id == compute_budget::id() {
            Ok(())
        } else if ix.program_id == system_program::id() {
            self.system(ix)
        } else if ix.program_id == spl_token::id() {
            self.token(ix)
        } else if ix.program_id == spl_associated_token_account::id() {
            self.associated_account(ix)
        } else if ix.program_id == TOKEN_METADATA_PROGRAM_ID {
            self.token_metadata(ix)
        } else {
            Err(InstructionError::UnsupportedProgramId)
        }
    }

    fn system(&mut self, ix: &Instruction) -> IxResult {
        let tag = ix
            .data
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
            .ok_or(InstructionError::InvalidInstructionData)?;
        let read_u64 = |at: usize| -> Result<u64, InstructionError> {
            ix.data
                .get(at..at + 8)
                .and_then(|b| b.try_into().ok())
                .map(u64::from_le_bytes)
                .ok_or(InstructionError::InvalidInstructionData)
        };
        match tag {
            // CreateAccount { lamports, space, owner }
            0 => {
                let new_account = account_at(ix, 1)?;
                require_signer(ix, 1)?;
                if self.accounts.contains_key(&new_account) {
                    return Err(InstructionError::Custom(0));
                }
                let lamports = read_u64(4)?;
                let space = read_u64(12)? as usize;
                self.accounts.insert(new_account, vec![0u8; space]);
                *self.lamports.entry(new_account).or_default() += lamports;
                Ok(())
            }
            // Transfer { lamports }
            2 => {
                let to = account_at(ix, 1)?;
                *self.lamports.entry(to).or_default() += read_u64(4)?;
                Ok(())
            }
            _ => Err(InstructionError::InvalidInstructionData),
        }
    }

    fn load_mint(&self, address: &Pubkey) -> Result<SplMint, InstructionError> {
        let data = self
            .accounts
            .get(address)
            .ok_or(InstructionError::UninitializedAccount)?;
        SplMint::unpack(data).map_err(|_| InstructionError::UninitializedAccount)
    }

    fn store_mint(&mut self, address: &Pubkey, mint: SplMint) -> IxResult {
        let data = self
            .accounts
            .get_mut(address)
            .ok_or(InstructionError::UninitializedAccount)?;
        SplMint::pack(mint, data).map_err(|_| InstructionError::AccountDataTooSmall)
    }

    fn load_token_account(&self, address: &Pubkey) -> Result<SplAccount, InstructionError> {
        let data = self
            .accounts
            .get(address)
            .ok_or(InstructionError::UninitializedAccount)?;
        SplAccount::unpack(data).map_err(|_| InstructionError::UninitializedAccount)
    }

    fn store_token_account(&mut self, address: &Pubkey, account: SplAccount) -> IxResult {
        let data = self
            .accounts
            .get_mut(address)
            .ok_or(InstructionError::UninitializedAccount)?;
        SplAccount::pack(account, data).map_err(|_| InstructionError::AccountDataTooSmall)
    }

    fn token(&mut self, ix: &Instruction) -> IxResult {
        let instruction =
            TokenInstruction::unpack(&ix.data).map_err(|_| InstructionError::InvalidInstructionData)?;
        match instruction {
            TokenInstruction::InitializeMint2 {
                decimals,
                mint_authority,
                freeze_authority,
            } => {
                let address = account_at(ix, 0)?;
                let data = self
                    .accounts
                    .get(&address)
                    .ok_or(InstructionError::UninitializedAccount)?;
                if data.len() != SplMint::LEN {
                    return Err(InstructionError::InvalidAccountData);
                }
                if SplMint::unpack(data).is_ok() {
                    return Err(InstructionError::Custom(TOKEN_ALREADY_IN_USE));
                }
                self.store_mint(
                    &address,
                    SplMint {
                        mint_authority: COption::Some(mint_authority),
                        supply: 0,
                        decimals,
                        is_initialized: true,
                        freeze_authority,
                    },
                )
            }
            TokenInstruction::MintTo { amount } => {
                let (mint_key, dest_key, authority) =
                    (account_at(ix, 0)?, account_at(ix, 1)?, account_at(ix, 2)?);
                require_signer(ix, 2)?;
                let mut mint = self.load_mint(&mint_key)?;
                if mint.mint_authority != COption::Some(authority) {
                    return Err(InstructionError::Custom(TOKEN_OWNER_MISMATCH));
                }
                let mut dest = self.load_token_account(&dest_key)?;
                dest.amount = dest
                    .amount
                    .checked_add(amount)
                    .ok_or(InstructionError::ArithmeticOverflow)?;
                mint.supply = mint
                    .supply
                    .checked_add(amount)
                    .ok_or(InstructionError::ArithmeticOverflow)?;
                self.store_token_account(&dest_key, dest)?;
                self.store_mint(&mint_key, mint)
            }
            TokenInstruction::SetAuthority {
                authority_type,
                new_authority,
            } => {
                let (mint_key, current) = (account_at(ix, 0)?, account_at(ix, 1)?);
                require_signer(ix, 1)?;
                let mut mint = self.load_mint(&mint_key)?;
                let slot = match authority_type {
                    AuthorityType::MintTokens => &mut mint.mint_authority,
                    AuthorityType::FreezeAccount => &mut mint.freeze_authority,
                    _ => return Err(InstructionError::InvalidArgument),
                };
                let existing = *slot;
                match existing {
                    COption::None if authority_type == AuthorityType::MintTokens => {
                        return Err(InstructionError::Custom(TOKEN_FIXED_SUPPLY))
                    }
                    COption::None => return Err(InstructionError::Custom(TOKEN_MINT_CANNOT_FREEZE)),
                    COption::Some(key) if key != current => {
                        return Err(InstructionError::Custom(TOKEN_OWNER_MISMATCH))
                    }
                    COption::Some(_) => *slot = new_authority,
                }
                self.store_mint(&mint_key, mint)
            }
            TokenInstruction::BurnChecked { amount, decimals } => {
                let (account_key, mint_key, owner) =
                    (account_at(ix, 0)?, account_at(ix, 1)?, account_at(ix, 2)?);
                require_signer(ix, 2)?;
                let mut mint = self.load_mint(&mint_key)?;
                if mint.decimals != decimals {
                    return Err(InstructionError::Custom(TOKEN_DECIMALS_MISMATCH));
                }
                let mut account = self.load_token_account(&account_key)?;
                if account.owner != owner {
                    return Err(InstructionError::Custom(TOKEN_OWNER_MISMATCH));
                }
                if account.amount < amount {
                    return Err(InstructionError::Custom(TOKEN_INSUFFICIENT_FUNDS));
                }
                account.amount -= amount;
                mint.supply = mint.supply.saturating_sub(amount);
                self.store_token_account(&account_key, account)?;
                self.store_mint(&mint_key, mint)
            }
            _ => Err(InstructionError::InvalidInstructionData),
        }
    }

    fn associated_account(&mut self, ix: &Instruction) -> IxResult {
        let (ata, wallet, mint) = (account_at(ix, 1)?, account_at(ix, 2)?, account_at(ix, 3)?);
        if ata != get_associated_token_address(&wallet, &mint) {
            return Err(InstructionError::InvalidSeeds);
        }
        self.load_mint(&mint)?;
        if self.accounts.contains_key(&ata) {
            return Err(InstructionError::AccountAlreadyInitialized);
        }
        self.accounts.insert(ata, pack_token_account(&mint, &wallet, 0));
        Ok(())
    }

    fn token_metadata(&mut self, ix: &Instruction) -> IxResult {
        let metadata_key = account_at(ix, 0)?;
        match ix.data.first() {
            Some(&crate::tx_builder::metadata_program::CREATE_METADATA_V3_DISCRIMINATOR) => {
                let (mint_key, mint_authority, update_authority) =
                    (account_at(ix, 1)?, account_at(ix, 2)?, account_at(ix, 4)?);
                require_signer(ix, 2)?;
                if metadata_key != find_metadata_address(&mint_key) {
                    return Err(InstructionError::InvalidSeeds);
                }
                if self.accounts.contains_key(&metadata_key) {
                    return Err(InstructionError::AccountAlreadyInitialized);
                }
                let mint = self.load_mint(&mint_key)?;
                if mint.mint_authority != COption::Some(mint_authority) {
                    return Err(InstructionError::Custom(TOKEN_OWNER_MISMATCH));
                }
                let (data, is_mutable) =
                    decode_create_args(&ix.data).map_err(|_| InstructionError::InvalidInstructionData)?;
                let metadata = OnChainMetadata {
                    update_authority,
                    mint: mint_key,
                    name: data.name,
                    symbol: data.symbol,
                    uri: data.uri,
                    seller_fee_basis_points: data.seller_fee_basis_points,
                    primary_sale_happened: false,
                    is_mutable,
                };
                self.accounts
                    .insert(metadata_key, encode_metadata_account(&metadata));
                Ok(())
            }
            Some(&crate::tx_builder::metadata_program::UPDATE_METADATA_V2_DISCRIMINATOR) => {
                let authority = account_at(ix, 1)?;
                require_signer(ix, 1)?;
                let data = self
                    .accounts
                    .get(&metadata_key)
                    .ok_or(InstructionError::UninitializedAccount)?;
                let mut metadata = parse_metadata(&metadata_key, data)
                    .map_err(|_| InstructionError::InvalidAccountData)?;
                if metadata.update_authority != authority {
                    return Err(InstructionError::Custom(METADATA_UPDATE_AUTHORITY_INCORRECT));
                }
                if !metadata.is_mutable {
                    return Err(InstructionError::Custom(METADATA_DATA_IS_IMMUTABLE));
                }
                let args =
                    decode_update_args(&ix.data).map_err(|_| InstructionError::InvalidInstructionData)?;
                if let Some(data) = args.data {
                    metadata.name = data.name;
                    metadata.symbol = data.symbol;
                    metadata.uri = data.uri;
                    metadata.seller_fee_basis_points = data.seller_fee_basis_points;
                }
                if let Some(new_authority) = args.new_update_authority {
                    metadata.update_authority = new_authority;
                }
                if let Some(primary_sale) = args.primary_sale_happened {
                    metadata.primary_sale_happened = primary_sale;
                }
                if let Some(is_mutable) = args.is_mutable {
                    metadata.is_mutable = is_mutable;
                }
                self.accounts
                    .insert(metadata_key, encode_metadata_account(&metadata));
                Ok(())
            }
            _ => Err(InstructionError::InvalidInstructionData),
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn latest_blockhash(&self) -> Result<(Hash, u64), ChainError> {
        let height = self.state.lock().block_height;
        Ok((Hash::new_unique(), height + BLOCKHASH_VALIDITY))
    }

    async fn block_height(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().block_height)
    }

    async fn minimum_balance_for_rent_exemption(&self, data_len: usize) -> Result<u64, ChainError> {
        Ok((data_len as u64 + 128) * self.rent_per_byte)
    }

    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, ChainError> {
        let state = self.state.lock();
        if state.fail_account_reads {
            return Err(ChainError::Transport("account read disabled".to_string()));
        }
        Ok(state.ledger.accounts.get(address).cloned())
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, ChainError> {
        let mut state = self.state.lock();
        state.sent.push(tx.clone());

        if let Some(err) = state.reject_queue.pop_front() {
            return Err(err);
        }
        if tx.verify().is_err() || !tx.is_signed() {
            return Err(ChainError::Rejected {
                error: Some(TransactionError::SignatureFailure),
                detail: "Transaction did not pass signature verification".to_string(),
            });
        }

        let mut working = state.ledger.clone();
        let instructions = ComposedTransaction::new(tx.clone(), 0).instructions();
        for (idx, ix) in instructions.iter().enumerate() {
            if let Err(err) = working.execute(ix) {
                let error = TransactionError::InstructionError(idx as u8, err);
                return Err(ChainError::Rejected {
                    detail: format!("Transaction simulation failed: {error}"),
                    error: Some(error),
                });
            }
        }
        state.ledger = working;

        let signature = tx.signatures[0];
        let status = if state.auto_confirm {
            SignatureState::Confirmed
        } else {
            SignatureState::Pending
        };
        state.statuses.insert(signature, status);
        state.confirmed.insert(
            signature,
            ConfirmedTransaction {
                succeeded: true,
                transfers: system_transfers(&VersionedTransaction::from(tx.clone())),
            },
        );
        Ok(signature)
    }

    async fn signature_state(&self, signature: &Signature) -> Result<SignatureState, ChainError> {
        Ok(self
            .state
            .lock()
            .statuses
            .get(signature)
            .cloned()
            .unwrap_or(SignatureState::Pending))
    }

    async fn confirmed_transaction(
        &self,
        signature: &Signature,
    ) -> Result<Option<ConfirmedTransaction>, ChainError> {
        let state = self.state.lock();
        match state.statuses.get(signature) {
            Some(SignatureState::Confirmed) => Ok(state.confirmed.get(signature).cloned()),
            _ => Ok(None),
        }
    }
}
