//! JSON-RPC implementation of [`ChainClient`]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use solana_client::client_error::ClientError;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcSendTransactionConfig, RpcTransactionConfig};
use solana_sdk::{
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::Transaction,
};
use solana_transaction_status::UiTransactionEncoding;
use tracing::debug;

use super::{system_transfers, ChainClient, ChainError, ConfirmedTransaction, SignatureState};

pub struct RpcChainClient {
    client: Arc<RpcClient>,
    commitment: CommitmentConfig,
}

impl RpcChainClient {
    pub fn new(url: impl Into<String>, timeout: Duration, commitment: CommitmentConfig) -> Self {
        Self {
            client: Arc::new(RpcClient::new_with_timeout_and_commitment(
                url.into(),
                timeout,
                commitment,
            )),
            commitment,
        }
    }

    pub fn url(&self) -> String {
        self.client.url()
    }
}

/// Keep the structured transaction error when the node returned one.
fn classify_client_error(err: ClientError) -> ChainError {
    match err.get_transaction_error() {
        Some(tx_err) => ChainError::Rejected {
            error: Some(tx_err),
            detail: err.to_string(),
        },
        None => ChainError::Transport(err.to_string()),
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn latest_blockhash(&self) -> Result<(Hash, u64), ChainError> {
        self.client
            .get_latest_blockhash_with_commitment(self.commitment)
            .await
            .map_err(classify_client_error)
    }

    async fn block_height(&self) -> Result<u64, ChainError> {
        self.client
            .get_block_height_with_commitment(self.commitment)
            .await
            .map_err(classify_client_error)
    }

    async fn minimum_balance_for_rent_exemption(&self, data_len: usize) -> Result<u64, ChainError> {
        self.client
            .get_minimum_balance_for_rent_exemption(data_len)
            .await
            .map_err(classify_client_error)
    }

    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, ChainError> {
        let response = self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await
            .map_err(classify_client_error)?;
        Ok(response.value.map(|account| account.data))
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, ChainError> {
        let config = RpcSendTransactionConfig {
            skip_preflight: false,
            preflight_commitment: Some(self.commitment.commitment),
            ..Default::default()
        };
        self.client
            .send_transaction_with_config(tx, config)
            .await
            .map_err(classify_client_error)
    }

    async fn signature_state(&self, signature: &Signature) -> Result<SignatureState, ChainError> {
        let status = self
            .client
            .get_signature_status_with_commitment(signature, self.commitment)
            .await
            .map_err(classify_client_error)?;
        Ok(match status {
            None => SignatureState::Pending,
            Some(Ok(())) => SignatureState::Confirmed,
            Some(Err(err)) => SignatureState::Failed(err),
        })
    }

    async fn confirmed_transaction(
        &self,
        signature: &Signature,
    ) -> Result<Option<ConfirmedTransaction>, ChainError> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };
        let confirmed = match self.client.get_transaction_with_config(signature, config).await {
            Ok(confirmed) => confirmed,
            Err(err) => {
                // getTransaction answers `null` for unknown signatures
                let text = err.to_string();
                if text.contains("invalid type: null") || text.contains("not found") {
                    debug!(signature = %signature, "transaction not found");
                    return Ok(None);
                }
                return Err(classify_client_error(err));
            }
        };

        let succeeded = confirmed
            .transaction
            .meta
            .as_ref()
            .map(|meta| meta.err.is_none())
            .unwrap_or(false);
        let transfers = confirmed
            .transaction
            .transaction
            .decode()
            .map(|tx| system_transfers(&tx))
            .unwrap_or_default();

        Ok(Some(ConfirmedTransaction {
            succeeded,
            transfers,
        }))
    }
}
