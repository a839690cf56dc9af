//! Configuration module for mintgate
//!
//! Configuration comes from a TOML file, then `.env` and process environment
//! overrides for secrets and deployment-specific addresses. Every section has
//! defaults so a missing file still yields a usable (if unconfigured) setup.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentConfig;

use crate::errors::FeeGateError;
use crate::fees::FeeSchedule;
use crate::tx_builder::submit::SubmitPolicy;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub wallet: WalletConfig,

    /// Address that receives service fees and on-chain membership payments
    #[serde(default)]
    pub treasury: TreasuryConfig,

    #[serde(default)]
    pub fees: FeeConfig,

    #[serde(default)]
    pub transaction: TransactionConfig,

    /// Object storage for logos and metadata JSON
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub membership: MembershipConfig,

    /// Card checkout and webhook settings
    #[serde(default)]
    pub stripe: StripeConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_url")]
    pub url: String,

    /// Request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,

    /// processed | confirmed | finalized
    #[serde(default = "default_commitment")]
    pub commitment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Path to keypair file
    #[serde(default = "default_keypair_path")]
    pub keypair_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreasuryConfig {
    #[serde(default)]
    pub wallet: String,
}

/// Fees in SOL; converted to lamports once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    #[serde(default = "default_base_fee")]
    pub premium_feature_fee_sol: f64,
    #[serde(default = "default_base_fee")]
    pub revoke_authority_fee_sol: f64,
    #[serde(default = "default_base_fee")]
    pub burn_fee_sol: f64,
    #[serde(default = "default_metadata_fee")]
    pub metadata_update_fee_sol: f64,
    /// Charged to active members for gated actions; must stay above zero
    #[serde(default = "default_member_fee")]
    pub member_fee_sol: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    #[serde(default = "default_max_submit_attempts")]
    pub max_submit_attempts: usize,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_secs: u64,
    /// Prepend a compute-unit-limit instruction when set
    #[serde(default)]
    pub compute_unit_limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub cloud_name: String,
    #[serde(default)]
    pub upload_preset: String,
    #[serde(default = "default_storage_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipConfig {
    /// Directory holding one JSON record per wallet
    #[serde(default = "default_membership_dir")]
    pub data_dir: String,

    /// Remote membership API; when unset the CLI reads the local store
    #[serde(default)]
    pub api_url: Option<String>,

    #[serde(default = "default_membership_poll")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeConfig {
    #[serde(default = "default_stripe_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default)]
    pub weekly_price_id: String,
    #[serde(default)]
    pub monthly_price_id: String,
    #[serde(default = "default_success_url")]
    pub success_url: String,
    #[serde(default = "default_cancel_url")]
    pub cancel_url: String,
    /// Maximum age of a webhook signature timestamp
    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Verify on-chain membership payments against the RPC node
    #[serde(default = "default_true")]
    pub verify_onchain_payments: bool,
    /// Accept `/membership/update` without a payment signature. Only for
    /// trusted deployments; never honored while verification is on.
    #[serde(default)]
    pub allow_unverified_updates: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_rpc_url() -> String { "https://api.mainnet-beta.solana.com".to_string() }
fn default_rpc_timeout() -> u64 { 30 }
fn default_commitment() -> String { "confirmed".to_string() }
fn default_keypair_path() -> String { "~/.config/solana/id.json".to_string() }
fn default_base_fee() -> f64 { 0.05 }
fn default_metadata_fee() -> f64 { 0.1 }
fn default_member_fee() -> f64 { 0.000001 }
fn default_max_submit_attempts() -> usize { 3 }
fn default_initial_backoff_ms() -> u64 { 200 }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_confirm_timeout() -> u64 { 60 }
fn default_storage_api_base() -> String { "https://api.cloudinary.com/v1_1".to_string() }
fn default_storage_timeout() -> u64 { 30 }
fn default_membership_dir() -> String { ".membership-data".to_string() }
fn default_membership_poll() -> u64 { 10 }
fn default_stripe_api_base() -> String { "https://api.stripe.com".to_string() }
fn default_success_url() -> String { "http://localhost:3000/membership?success=true".to_string() }
fn default_cancel_url() -> String { "http://localhost:3000/membership?canceled=true".to_string() }
fn default_webhook_tolerance() -> u64 { 300 }
fn default_bind_addr() -> String { "0.0.0.0:3001".to_string() }
fn default_log_filter() -> String { "mintgate=info,warn".to_string() }
fn default_true() -> bool { true }

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            timeout_secs: default_rpc_timeout(),
            commitment: default_commitment(),
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            keypair_path: default_keypair_path(),
        }
    }
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            premium_feature_fee_sol: default_base_fee(),
            revoke_authority_fee_sol: default_base_fee(),
            burn_fee_sol: default_base_fee(),
            metadata_update_fee_sol: default_metadata_fee(),
            member_fee_sol: default_member_fee(),
        }
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_submit_attempts: default_max_submit_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            confirm_timeout_secs: default_confirm_timeout(),
            compute_unit_limit: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            api_base: default_storage_api_base(),
            cloud_name: String::new(),
            upload_preset: String::new(),
            timeout_secs: default_storage_timeout(),
        }
    }
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            data_dir: default_membership_dir(),
            api_url: None,
            poll_interval_secs: default_membership_poll(),
        }
    }
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            api_base: default_stripe_api_base(),
            secret_key: String::new(),
            webhook_secret: String::new(),
            weekly_price_id: String::new(),
            monthly_price_id: String::new(),
            success_url: default_success_url(),
            cancel_url: default_cancel_url(),
            webhook_tolerance_secs: default_webhook_tolerance(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            verify_onchain_payments: default_true(),
            allow_unverified_updates: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with `.env` and environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Defaults plus environment overrides, for when no file exists
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply overrides from a key lookup; empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("RPC_URL") {
            self.rpc.url = v;
        }
        if let Some(v) = get("TREASURY_WALLET") {
            self.treasury.wallet = v;
        }
        if let Some(v) = get("CLOUDINARY_CLOUD_NAME") {
            self.storage.cloud_name = v;
        }
        if let Some(v) = get("CLOUDINARY_UPLOAD_PRESET") {
            self.storage.upload_preset = v;
        }
        if let Some(v) = get("STRIPE_SECRET_KEY") {
            self.stripe.secret_key = v;
        }
        if let Some(v) = get("STRIPE_WEBHOOK_SECRET") {
            self.stripe.webhook_secret = v;
        }
        if let Some(v) = get("STRIPE_WEEKLY_PRICE_ID") {
            self.stripe.weekly_price_id = v;
        }
        if let Some(v) = get("STRIPE_MONTHLY_PRICE_ID") {
            self.stripe.monthly_price_id = v;
        }
        if let Some(v) = get("MEMBERSHIP_API_URL") {
            self.membership.api_url = Some(v);
        }
    }

    /// Check values that would otherwise fail deep inside an operation.
    ///
    /// Secrets and the treasury are checked where they are used, since not
    /// every subcommand needs them.
    pub fn validate(&self) -> Result<(), FeeGateError> {
        if !(self.rpc.url.starts_with("http://") || self.rpc.url.starts_with("https://")) {
            return Err(FeeGateError::config(format!(
                "rpc.url must be an http(s) URL, got {:?}",
                self.rpc.url
            )));
        }
        self.commitment()?;
        FeeSchedule::from_config(&self.fees)?;
        if self.transaction.max_submit_attempts == 0 {
            return Err(FeeGateError::config("transaction.max_submit_attempts must be at least 1"));
        }
        if self.transaction.confirm_timeout_secs == 0 {
            return Err(FeeGateError::config("transaction.confirm_timeout_secs must be positive"));
        }
        if self.membership.poll_interval_secs == 0 {
            return Err(FeeGateError::config("membership.poll_interval_secs must be positive"));
        }
        if self.stripe.webhook_tolerance_secs == 0 {
            return Err(FeeGateError::config("stripe.webhook_tolerance_secs must be positive"));
        }
        Ok(())
    }

    pub fn commitment(&self) -> Result<CommitmentConfig, FeeGateError> {
        match self.rpc.commitment.as_str() {
            "processed" => Ok(CommitmentConfig::processed()),
            "confirmed" => Ok(CommitmentConfig::confirmed()),
            "finalized" => Ok(CommitmentConfig::finalized()),
            other => Err(FeeGateError::config(format!("unknown rpc.commitment {other:?}"))),
        }
    }

    pub fn submit_policy(&self) -> SubmitPolicy {
        SubmitPolicy {
            max_attempts: self.transaction.max_submit_attempts,
            initial_backoff: Duration::from_millis(self.transaction.initial_backoff_ms),
            max_backoff: Duration::from_secs(2),
            poll_interval: Duration::from_millis(self.transaction.poll_interval_ms),
            confirm_timeout: Duration::from_secs(self.transaction.confirm_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.fees.metadata_update_fee_sol, 0.1);
        assert_eq!(config.membership.data_dir, ".membership-data");
        assert_eq!(config.stripe.webhook_tolerance_secs, 300);
        assert!(config.transaction.compute_unit_limit.is_none());
        assert!(config.server.verify_onchain_payments);
        assert!(!config.server.allow_unverified_updates);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
            [rpc]
            url = "http://127.0.0.1:8899"

            [fees]
            burn_fee_sol = 0.02

            [transaction]
            compute_unit_limit = 250000
            "#,
        )
        .unwrap();
        assert_eq!(config.rpc.url, "http://127.0.0.1:8899");
        assert_eq!(config.rpc.commitment, "confirmed");
        assert_eq!(config.fees.burn_fee_sol, 0.02);
        assert_eq!(config.fees.premium_feature_fee_sol, 0.05);
        assert_eq!(config.transaction.compute_unit_limit, Some(250_000));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TREASURY_WALLET", "Treasury111"),
            ("STRIPE_WEBHOOK_SECRET", "whsec_test"),
            ("CLOUDINARY_CLOUD_NAME", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.storage.cloud_name = "from-file".to_string();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.treasury.wallet, "Treasury111");
        assert_eq!(config.stripe.webhook_secret, "whsec_test");
        // empty values do not clobber file settings
        assert_eq!(config.storage.cloud_name, "from-file");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.rpc.commitment = "eventually".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.fees.member_fee_sol = 0.0;
        assert!(matches!(config.validate(), Err(FeeGateError::InvalidAmount(_))));

        let mut config = Config::default();
        config.rpc.url = "localhost:8899".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[membership]\ndata_dir = \"/var/lib/mintgate\"\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.membership.data_dir, "/var/lib/mintgate");
    }
}
