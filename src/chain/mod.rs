//! Solana access behind a trait
//!
//! The orchestrator and the membership service only see [`ChainClient`].
//! [`rpc::RpcChainClient`] talks to a JSON-RPC node; the test suite drives a
//! mock that executes the handful of programs this service uses.

pub mod accounts;
pub(crate) mod codec;
pub mod rpc;
pub mod wallet;

use async_trait::async_trait;
use solana_sdk::{
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::{Transaction, TransactionError, VersionedTransaction},
};
use thiserror::Error;

use crate::tx_builder::payment::decode_transfer;

#[derive(Error, Debug, Clone)]
pub enum ChainError {
    /// Node unreachable, timed out or returned garbage
    #[error("RPC transport error: {0}")]
    Transport(String),

    /// The node refused the transaction (preflight or execution)
    #[error("transaction rejected: {detail}")]
    Rejected {
        error: Option<TransactionError>,
        detail: String,
    },

    #[error("account {account} is malformed: {reason}")]
    MalformedAccount { account: Pubkey, reason: String },
}

impl ChainError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::Transport(_))
    }
}

/// Status of a submitted signature at the client's commitment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureState {
    Pending,
    Confirmed,
    Failed(TransactionError),
}

/// A system transfer found in a confirmed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemTransfer {
    pub from: Pubkey,
    pub to: Pubkey,
    pub lamports: u64,
}

/// The parts of a confirmed transaction the membership rail inspects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedTransaction {
    pub succeeded: bool,
    pub transfers: Vec<SystemTransfer>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Latest blockhash and the last block height at which it is valid
    async fn latest_blockhash(&self) -> Result<(Hash, u64), ChainError>;

    async fn block_height(&self) -> Result<u64, ChainError>;

    async fn minimum_balance_for_rent_exemption(&self, data_len: usize) -> Result<u64, ChainError>;

    /// Raw account data, `None` when the account does not exist
    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, ChainError>;

    async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, ChainError>;

    async fn signature_state(&self, signature: &Signature) -> Result<SignatureState, ChainError>;

    /// Fetch a confirmed transaction, `None` when the node does not know it
    async fn confirmed_transaction(
        &self,
        signature: &Signature,
    ) -> Result<Option<ConfirmedTransaction>, ChainError>;
}

/// Extract top-level system transfers from a transaction.
///
/// Only statically listed account keys are resolved; instructions that
/// reference lookup-table accounts are skipped.
pub fn system_transfers(tx: &VersionedTransaction) -> Vec<SystemTransfer> {
    let keys = tx.message.static_account_keys();
    tx.message
        .instructions()
        .iter()
        .filter_map(|ix| {
            let program_id = keys.get(usize::from(ix.program_id_index))?;
            let lamports = decode_transfer(program_id, &ix.data)?;
            let from = keys.get(usize::from(*ix.accounts.first()?))?;
            let to = keys.get(usize::from(*ix.accounts.get(1)?))?;
            Some(SystemTransfer {
                from: *from,
                to: *to,
                lamports,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{
        message::Message,
        signature::Keypair,
        signer::Signer,
        system_instruction,
    };

    #[test]
    fn test_system_transfers_extracts_payment() {
        let payer = Keypair::new();
        let treasury = Pubkey::new_unique();
        let other = Pubkey::new_unique();
        let message = Message::new(
            &[
                system_instruction::create_account(&payer.pubkey(), &other, 5, 0, &Pubkey::new_unique()),
                system_instruction::transfer(&payer.pubkey(), &treasury, 1_000_000_000),
            ],
            Some(&payer.pubkey()),
        );
        let tx = VersionedTransaction::from(Transaction::new_unsigned(message));

        let transfers = system_transfers(&tx);
        assert_eq!(
            transfers,
            vec![SystemTransfer {
                from: payer.pubkey(),
                to: treasury,
                lamports: 1_000_000_000,
            }]
        );
    }
}
