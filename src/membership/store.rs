//! Membership persistence
//!
//! Records are keyed by wallet public key, so file names can never escape
//! the data directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

/// Persisted membership record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRecord {
    /// Value at write time; readers recompute from `expires_at`
    pub is_active: bool,
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub revision: u64,
    /// Most recent purchase applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_ref: Option<String>,
    /// Every purchase reference ever applied to this wallet
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied_refs: Vec<String>,
}

impl MembershipRecord {
    pub fn has_applied(&self, purchase_ref: &str) -> bool {
        self.purchase_ref.as_deref() == Some(purchase_ref)
            || self.applied_refs.iter().any(|r| r == purchase_ref)
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid wallet address: {0}")]
    InvalidWallet(String),

    #[error("membership storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("membership record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn load(&self, wallet: &Pubkey) -> Result<Option<MembershipRecord>, StoreError>;

    async fn save(&self, wallet: &Pubkey, record: &MembershipRecord) -> Result<(), StoreError>;
}

/// One pretty-printed JSON file per wallet under `dir`
#[derive(Debug, Clone)]
pub struct FileMembershipStore {
    dir: PathBuf,
}

impl FileMembershipStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, wallet: &Pubkey) -> PathBuf {
        self.dir.join(format!("{wallet}.json"))
    }
}

#[async_trait]
impl MembershipStore for FileMembershipStore {
    async fn load(&self, wallet: &Pubkey) -> Result<Option<MembershipRecord>, StoreError> {
        match tokio::fs::read_to_string(self.path_for(wallet)).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, wallet: &Pubkey, record: &MembershipRecord) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(wallet);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(record)?;
        // write-then-rename so readers never see a torn file
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// Map-backed store; reads can be made to fail to exercise fail-closed paths
#[derive(Debug, Default)]
pub struct InMemoryMembershipStore {
    records: DashMap<Pubkey, MembershipRecord>,
    fail_reads: AtomicBool,
}

impl InMemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, wallet: &Pubkey) -> Option<MembershipRecord> {
        self.records.get(wallet).map(|r| r.value().clone())
    }
}

#[async_trait]
impl MembershipStore for InMemoryMembershipStore {
    async fn load(&self, wallet: &Pubkey) -> Result<Option<MembershipRecord>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                ErrorKind::Other,
                "membership store unavailable",
            )));
        }
        Ok(self.get(wallet))
    }

    async fn save(&self, wallet: &Pubkey, record: &MembershipRecord) -> Result<(), StoreError> {
        self.records.insert(*wallet, record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(expires_at: i64) -> MembershipRecord {
        MembershipRecord {
            is_active: true,
            expires_at: Some(expires_at),
            revision: 1,
            purchase_ref: Some("cs_test_1".to_string()),
            applied_refs: vec!["cs_test_1".to_string()],
        }
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMembershipStore::new(dir.path().join("nested"));
        let wallet = Pubkey::new_unique();

        assert_eq!(store.load(&wallet).await.unwrap(), None);
        store.save(&wallet, &record(42)).await.unwrap();
        assert_eq!(store.load(&wallet).await.unwrap(), Some(record(42)));

        let path = dir.path().join("nested").join(format!("{wallet}.json"));
        let raw = std::fs::read_to_string(path).unwrap();
        assert!(raw.contains("\"expiresAt\": 42"));
        assert!(raw.contains("\"purchaseRef\": \"cs_test_1\""));
    }

    #[tokio::test]
    async fn test_file_store_reads_legacy_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMembershipStore::new(dir.path());
        let wallet = Pubkey::new_unique();
        std::fs::write(
            dir.path().join(format!("{wallet}.json")),
            r#"{"isActive": true, "expiresAt": 99}"#,
        )
        .unwrap();

        let loaded = store.load(&wallet).await.unwrap().unwrap();
        assert_eq!(loaded.expires_at, Some(99));
        assert_eq!(loaded.revision, 0);
        assert_eq!(loaded.purchase_ref, None);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMembershipStore::new(dir.path());
        let wallet = Pubkey::new_unique();
        std::fs::write(dir.path().join(format!("{wallet}.json")), "{not json").unwrap();
        assert!(matches!(store.load(&wallet).await, Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_in_memory_fail_reads() {
        let store = InMemoryMembershipStore::new();
        let wallet = Pubkey::new_unique();
        store.save(&wallet, &record(1)).await.unwrap();
        store.set_fail_reads(true);
        assert!(store.load(&wallet).await.is_err());
        store.set_fail_reads(false);
        assert!(store.load(&wallet).await.unwrap().is_some());
    }
}
