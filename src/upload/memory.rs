//! In-memory asset store for tests and dry runs

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use super::{AssetKind, AssetStore, PendingUpload, UploadError, UploadedAsset};

#[derive(Debug, Default)]
pub struct InMemoryAssetStore {
    objects: DashMap<String, Vec<u8>>,
    next_id: AtomicU64,
    failing: DashSet<AssetKind>,
}

impl InMemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every upload of `kind` fail with a provider rejection
    pub fn fail_uploads_of(&self, kind: AssetKind) {
        self.failing.insert(kind);
    }

    pub fn upload_count(&self) -> usize {
        self.objects.len()
    }

    /// Store bytes under a caller-chosen URL
    pub fn insert(&self, url: impl Into<String>, bytes: Vec<u8>) {
        self.objects.insert(url.into(), bytes);
    }
}

#[async_trait]
impl AssetStore for InMemoryAssetStore {
    async fn upload(&self, upload: PendingUpload) -> Result<UploadedAsset, UploadError> {
        if self.failing.contains(&upload.kind) {
            return Err(UploadError::Rejected {
                status: 400,
                message: format!("uploads to {} are disabled", upload.kind.folder()),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let url = format!(
            "memory://{}/{}/{id}-{}",
            upload.kind.resource_type(),
            upload.kind.folder(),
            upload.file_name
        );
        self.objects.insert(url.clone(), upload.bytes);
        Ok(UploadedAsset {
            secure_url: url,
            folder: upload.kind.folder().to_string(),
            resource_type: upload.kind.resource_type().to_string(),
        })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, UploadError> {
        self.objects
            .get(url)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| UploadError::NotFound(url.to_string()))
    }
}
