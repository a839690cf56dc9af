//! Error taxonomy for fee-gated token operations
//!
//! Every public operation in the crate returns [`FeeGateError`]. Boundary
//! errors (`ChainError`, `UploadError`, `StoreError`) are converted here so
//! provider detail never leaks past the orchestrator except as detail text.

use std::fmt;

use solana_sdk::instruction::InstructionError;
use solana_sdk::transaction::TransactionError;
use thiserror::Error;

use crate::chain::ChainError;
use crate::membership::store::StoreError;
use crate::upload::UploadError;

/// Why the network refused a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionKind {
    /// Payer cannot cover fees, rent or the transfer amount
    InsufficientFunds,
    /// The wallet does not hold the authority the instruction needs
    AuthorityMismatch,
    /// The blockhash aged out before the leader saw the transaction
    BlockhashExpired,
    Other,
}

impl RejectionKind {
    /// Classify a rejection from the structured error when the RPC returned
    /// one, falling back to the log text otherwise.
    pub fn classify(error: Option<&TransactionError>, detail: &str) -> Self {
        match error {
            Some(TransactionError::BlockhashNotFound) => Self::BlockhashExpired,
            Some(TransactionError::InsufficientFundsForFee)
            | Some(TransactionError::InsufficientFundsForRent { .. }) => Self::InsufficientFunds,
            Some(TransactionError::InstructionError(_, ix_err)) => match ix_err {
                // spl-token: 1 = InsufficientFunds, 4 = OwnerMismatch
                InstructionError::Custom(1) | InstructionError::InsufficientFunds => {
                    Self::InsufficientFunds
                }
                InstructionError::Custom(4)
                | InstructionError::MissingRequiredSignature
                | InstructionError::IllegalOwner => Self::AuthorityMismatch,
                _ => Self::Other,
            },
            Some(_) => Self::Other,
            None => Self::classify_text(detail),
        }
    }

    fn classify_text(detail: &str) -> Self {
        let lower = detail.to_ascii_lowercase();
        if lower.contains("blockhash not found") || lower.contains("blockhash expired") {
            Self::BlockhashExpired
        } else if lower.contains("insufficient") {
            Self::InsufficientFunds
        } else if lower.contains("owner does not match") || lower.contains("missing required signature") {
            Self::AuthorityMismatch
        } else {
            Self::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientFunds => "insufficient_funds",
            Self::AuthorityMismatch => "authority_mismatch",
            Self::BlockhashExpired => "blockhash_expired",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for every fee-gated operation
#[derive(Error, Debug)]
pub enum FeeGateError {
    /// Treasury, storage or payment provider settings are missing or invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Object storage refused or failed an upload
    ///
    /// Raised for both the logo and the JSON document; a metadata failure
    /// after a successful logo upload is still an upload failure.
    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),

    /// A fee amount was zero, negative or not a number
    #[error("Invalid fee amount: {0}")]
    InvalidAmount(String),

    /// The network rejected the transaction
    #[error("Transaction rejected ({kind}): {detail}")]
    TransactionRejected {
        kind: RejectionKind,
        detail: String,
    },

    /// Submitted but not confirmed within the blockhash window or timeout
    ///
    /// The outcome is unknown. Never retried automatically.
    #[error("Confirmation timed out for signature {signature}")]
    ConfirmationTimeout { signature: String },

    /// Reading membership state failed; callers treat the wallet as inactive
    #[error("Membership lookup failed: {0}")]
    MembershipLookup(String),

    /// Burn amount exceeds the wallet's balance (raw base units)
    #[error("Insufficient token balance: requested {requested}, available {available}")]
    InsufficientTokenBalance { requested: u64, available: u64 },

    /// Metadata has been locked; no further updates are possible
    #[error("Metadata for mint {mint} is immutable")]
    MetadataImmutable { mint: String },

    /// The wallet is not the authority required for the operation
    #[error("Authority mismatch: {0}")]
    AuthorityMismatch(String),

    /// Caller input failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Composed instructions violate the required ordering
    #[error("Invalid instruction order: {0}")]
    InvalidInstructionOrder(String),

    /// Failed to sign the transaction
    #[error("Signing failed: {0}")]
    Signing(String),

    /// RPC transport failure
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Membership store read/write failure
    #[error("Membership storage error: {0}")]
    Storage(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FeeGateError {
    /// Check if this error is potentially retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upload(e) => e.is_retryable(),
            Self::TransactionRejected { kind, .. } => *kind == RejectionKind::BlockhashExpired,
            Self::Rpc(_) => true,
            Self::MembershipLookup(_) => true,
            Self::Storage(_) => true,

            // Unknown outcome: resubmitting could double-charge
            Self::ConfirmationTimeout { .. } => false,
            Self::Configuration(_) => false,
            Self::InvalidAmount(_) => false,
            Self::InsufficientTokenBalance { .. } => false,
            Self::MetadataImmutable { .. } => false,
            Self::AuthorityMismatch(_) => false,
            Self::Validation(_) => false,
            Self::InvalidInstructionOrder(_) => false,
            Self::Signing(_) => false,
            Self::Internal(_) => false,
        }
    }

    /// Whether the composer may rebuild with a fresh blockhash and resend
    pub fn is_resubmittable(&self) -> bool {
        matches!(
            self,
            Self::TransactionRejected {
                kind: RejectionKind::BlockhashExpired,
                ..
            }
        )
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "config",
            Self::Upload(_) => "upload",
            Self::InvalidAmount(_) => "amount",
            Self::TransactionRejected { .. } => "rejected",
            Self::ConfirmationTimeout { .. } => "confirmation_timeout",
            Self::MembershipLookup(_) => "membership_lookup",
            Self::InsufficientTokenBalance { .. } => "balance",
            Self::MetadataImmutable { .. } => "immutable",
            Self::AuthorityMismatch(_) => "authority",
            Self::Validation(_) => "validation",
            Self::InvalidInstructionOrder(_) => "instruction_order",
            Self::Signing(_) => "signing",
            Self::Rpc(_) => "rpc",
            Self::Storage(_) => "storage",
            Self::Internal(_) => "internal",
        }
    }

    /// Text suitable for showing to the person who triggered the action
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(_) => {
                "The service is not configured correctly. Please contact support.".to_string()
            }
            Self::Upload(_) => "Uploading token assets failed. Please try again.".to_string(),
            Self::InvalidAmount(_) => "The service fee for this action could not be computed.".to_string(),
            Self::TransactionRejected { kind, .. } => match kind {
                RejectionKind::InsufficientFunds => {
                    "Your wallet does not have enough SOL to cover the transaction and service fee."
                        .to_string()
                }
                RejectionKind::AuthorityMismatch => {
                    "Your wallet is not the authority for this token.".to_string()
                }
                RejectionKind::BlockhashExpired => {
                    "The network took too long to accept the transaction. Please try again."
                        .to_string()
                }
                RejectionKind::Other => "The network rejected the transaction.".to_string(),
            },
            Self::ConfirmationTimeout { signature } => format!(
                "Transaction {signature} was sent but not confirmed in time. It may still \
                 succeed: check a block explorer before trying again."
            ),
            Self::MembershipLookup(_) => {
                "Membership status is unavailable; standard fees apply.".to_string()
            }
            Self::InsufficientTokenBalance { .. } => {
                "You cannot burn more tokens than your wallet holds.".to_string()
            }
            Self::MetadataImmutable { .. } => {
                "This token's metadata is permanently locked and cannot be changed.".to_string()
            }
            Self::AuthorityMismatch(_) => "Your wallet is not the authority for this token.".to_string(),
            Self::Validation(msg) => msg.clone(),
            Self::InvalidInstructionOrder(_) | Self::Signing(_) | Self::Internal(_) => {
                "Something went wrong while preparing the transaction.".to_string()
            }
            Self::Rpc(_) => "The Solana network is unreachable right now. Please try again.".to_string(),
            Self::Storage(_) => "Membership records are unavailable right now.".to_string(),
        }
    }
}

// Convenience constructors
impl FeeGateError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    pub fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidInstructionOrder(reason.into())
    }

    pub fn rejected(kind: RejectionKind, detail: impl Into<String>) -> Self {
        Self::TransactionRejected {
            kind,
            detail: detail.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }
}

impl From<ChainError> for FeeGateError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Transport(msg) => Self::Rpc(msg),
            ChainError::Rejected { error, detail } => Self::TransactionRejected {
                kind: RejectionKind::classify(error.as_ref(), &detail),
                detail,
            },
            ChainError::MalformedAccount { account, reason } => {
                Self::Validation(format!("account {account} is not in the expected format: {reason}"))
            }
        }
    }
}

impl From<StoreError> for FeeGateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidWallet(w) => Self::Validation(format!("invalid wallet address: {w}")),
            other => Self::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FeeGateError::InsufficientTokenBalance {
            requested: 100,
            available: 50,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient token balance: requested 100, available 50"
        );

        let err = FeeGateError::rejected(RejectionKind::BlockhashExpired, "Blockhash not found");
        assert_eq!(
            err.to_string(),
            "Transaction rejected (blockhash_expired): Blockhash not found"
        );
    }

    #[test]
    fn test_error_retryability() {
        assert!(FeeGateError::rejected(RejectionKind::BlockhashExpired, "x").is_retryable());
        assert!(FeeGateError::Rpc("down".to_string()).is_retryable());

        assert!(!FeeGateError::ConfirmationTimeout {
            signature: "sig".to_string()
        }
        .is_retryable());
        assert!(!FeeGateError::rejected(RejectionKind::InsufficientFunds, "x").is_retryable());
        assert!(!FeeGateError::MetadataImmutable {
            mint: "m".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_only_expired_blockhash_is_resubmittable() {
        assert!(FeeGateError::rejected(RejectionKind::BlockhashExpired, "x").is_resubmittable());
        assert!(!FeeGateError::rejected(RejectionKind::Other, "x").is_resubmittable());
        assert!(!FeeGateError::Rpc("x".to_string()).is_resubmittable());
    }

    #[test]
    fn test_classify_structured_errors() {
        assert_eq!(
            RejectionKind::classify(Some(&TransactionError::BlockhashNotFound), ""),
            RejectionKind::BlockhashExpired
        );
        assert_eq!(
            RejectionKind::classify(Some(&TransactionError::InsufficientFundsForFee), ""),
            RejectionKind::InsufficientFunds
        );
        assert_eq!(
            RejectionKind::classify(
                Some(&TransactionError::InstructionError(3, InstructionError::Custom(4))),
                ""
            ),
            RejectionKind::AuthorityMismatch
        );
        assert_eq!(
            RejectionKind::classify(
                Some(&TransactionError::InstructionError(0, InstructionError::Custom(1))),
                ""
            ),
            RejectionKind::InsufficientFunds
        );
        assert_eq!(
            RejectionKind::classify(Some(&TransactionError::AccountInUse), ""),
            RejectionKind::Other
        );
    }

    #[test]
    fn test_classify_from_text() {
        assert_eq!(
            RejectionKind::classify(None, "Transaction simulation failed: Blockhash not found"),
            RejectionKind::BlockhashExpired
        );
        assert_eq!(
            RejectionKind::classify(None, "Error: insufficient lamports 10, need 20"),
            RejectionKind::InsufficientFunds
        );
        assert_eq!(RejectionKind::classify(None, "boom"), RejectionKind::Other);
    }

    #[test]
    fn test_chain_error_conversion() {
        let err: FeeGateError = ChainError::Rejected {
            error: Some(TransactionError::BlockhashNotFound),
            detail: "expired".to_string(),
        }
        .into();
        assert!(err.is_resubmittable());

        let err: FeeGateError = ChainError::Transport("timeout".to_string()).into();
        assert_eq!(err.category(), "rpc");
    }

    #[test]
    fn test_timeout_message_advises_explorer() {
        let err = FeeGateError::ConfirmationTimeout {
            signature: "5xyz".to_string(),
        };
        let msg = err.user_message();
        assert!(msg.contains("5xyz"));
        assert!(msg.contains("explorer"));
    }
}
