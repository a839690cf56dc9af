//! Submission and confirmation
//!
//! A transaction is sent once per attempt. Only an expired blockhash makes
//! the submitter rebuild (fresh blockhash, fresh signatures) and resend;
//! every other rejection and every confirmation timeout surfaces to the
//! caller unchanged.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use solana_sdk::signature::Signature;
use tokio::time::Instant;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};

use crate::chain::{ChainClient, SignatureState};
use crate::errors::{FeeGateError, RejectionKind};
use crate::metrics::{metrics, Timer};
use crate::tx_builder::output::ComposedTransaction;

#[derive(Debug, Clone)]
pub struct SubmitPolicy {
    /// Attempts including the first; only expired blockhashes trigger another
    pub max_attempts: usize,
    /// First backoff delay; doubles per attempt
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub poll_interval: Duration,
    pub confirm_timeout: Duration,
}

impl Default for SubmitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            poll_interval: Duration::from_millis(500),
            confirm_timeout: Duration::from_secs(60),
        }
    }
}

pub struct TransactionSubmitter {
    chain: Arc<dyn ChainClient>,
    policy: SubmitPolicy,
}

impl TransactionSubmitter {
    pub fn new(chain: Arc<dyn ChainClient>, policy: SubmitPolicy) -> Self {
        Self { chain, policy }
    }

    pub fn policy(&self) -> &SubmitPolicy {
        &self.policy
    }

    /// Build, send and confirm, rebuilding only after an expired blockhash.
    ///
    /// `build` is called once per attempt and must return a fully signed
    /// transaction against a fresh blockhash.
    pub async fn execute<F, Fut>(&self, mut build: F) -> Result<Signature, FeeGateError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ComposedTransaction, FeeGateError>>,
    {
        let base_ms = self.policy.initial_backoff.as_millis().max(2) as u64;
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(base_ms / 2)
            .max_delay(self.policy.max_backoff)
            .map(jitter)
            .take(self.policy.max_attempts.saturating_sub(1));

        let mut attempt = 0usize;
        RetryIf::spawn(
            strategy,
            || {
                attempt += 1;
                if attempt > 1 {
                    metrics().blockhash_resubmits.inc();
                    info!(attempt, "blockhash expired, rebuilding transaction");
                }
                let composed = build();
                async move {
                    let composed = composed.await?;
                    self.submit_and_confirm(&composed).await
                }
            },
            |err: &FeeGateError| err.is_resubmittable(),
        )
        .await
    }

    /// Send one signed transaction and wait for its confirmation.
    pub async fn submit_and_confirm(
        &self,
        composed: &ComposedTransaction,
    ) -> Result<Signature, FeeGateError> {
        if !composed.is_fully_signed() {
            return Err(FeeGateError::Signing(format!(
                "transaction is missing signatures from {:?}",
                composed.missing_signers()
            )));
        }

        let signature = match self.chain.send_transaction(&composed.tx).await {
            Ok(signature) => signature,
            Err(err) => {
                let err = FeeGateError::from(err);
                if let FeeGateError::TransactionRejected { kind, detail } = &err {
                    metrics()
                        .transactions_rejected
                        .with_label_values(&[kind.as_str()])
                        .inc();
                    warn!(kind = %kind, detail = %detail, "transaction rejected");
                }
                return Err(err);
            }
        };
        metrics().transactions_submitted.inc();
        debug!(signature = %signature, "transaction sent");

        self.await_confirmation(signature, composed.last_valid_block_height)
            .await
    }

    /// Poll until confirmed, failed, the blockhash window closes or the
    /// timeout elapses.
    pub async fn await_confirmation(
        &self,
        signature: Signature,
        last_valid_block_height: u64,
    ) -> Result<Signature, FeeGateError> {
        let timer = Timer::new();
        let deadline = Instant::now() + self.policy.confirm_timeout;

        loop {
            match self.chain.signature_state(&signature).await {
                Ok(SignatureState::Confirmed) => {
                    timer.observe_duration(&metrics().confirmation_latency);
                    metrics().transactions_confirmed.inc();
                    info!(signature = %signature, elapsed_secs = timer.elapsed_secs(), "transaction confirmed");
                    return Ok(signature);
                }
                Ok(SignatureState::Failed(err)) => {
                    let detail = err.to_string();
                    let kind = RejectionKind::classify(Some(&err), &detail);
                    metrics()
                        .transactions_rejected
                        .with_label_values(&[kind.as_str()])
                        .inc();
                    warn!(signature = %signature, kind = %kind, detail = %detail, "transaction failed on chain");
                    return Err(FeeGateError::TransactionRejected { kind, detail });
                }
                Ok(SignatureState::Pending) => {}
                Err(err) => {
                    debug!(signature = %signature, error = %err, "status poll failed");
                }
            }

            let window_closed = match self.chain.block_height().await {
                Ok(height) => height > last_valid_block_height,
                Err(err) => {
                    debug!(error = %err, "block height poll failed");
                    false
                }
            };

            if window_closed || Instant::now() >= deadline {
                metrics().confirmation_timeouts.inc();
                warn!(
                    signature = %signature,
                    window_closed,
                    "confirmation gave up; outcome unknown"
                );
                return Err(FeeGateError::ConfirmationTimeout {
                    signature: signature.to_string(),
                });
            }

            tokio::time::sleep(self.policy.poll_interval).await;
        }
    }
}
