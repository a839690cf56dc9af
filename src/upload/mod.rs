//! Asset upload pipeline
//!
//! Logos and metadata JSON go to object storage and come back as permanent
//! URLs. The logo is uploaded first so its URL can be embedded in the JSON;
//! the JSON URL becomes the on-chain metadata `uri`.

pub mod cloudinary;
pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::errors::FeeGateError;
use crate::metrics::{metrics, Timer};
use crate::types::{LogoFile, TokenMetadataDocument};

pub const MAX_LOGO_BYTES: usize = 5 * 1024 * 1024;
pub const ACCEPTED_IMAGE_TYPES: [&str; 4] = ["image/jpeg", "image/jpg", "image/png", "image/webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Image,
    Json,
}

impl AssetKind {
    pub fn folder(&self) -> &'static str {
        match self {
            AssetKind::Image => "token-logos",
            AssetKind::Json => "token-metadata",
        }
    }

    pub fn resource_type(&self) -> &'static str {
        match self {
            AssetKind::Image => "image",
            AssetKind::Json => "raw",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpload {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: String,
    pub kind: AssetKind,
}

impl PendingUpload {
    pub fn image(logo: LogoFile) -> Self {
        Self {
            bytes: logo.bytes,
            file_name: logo.file_name,
            content_type: logo.content_type,
            kind: AssetKind::Image,
        }
    }

    pub fn json<T: Serialize>(value: &T) -> Result<Self, FeeGateError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| FeeGateError::internal(format!("failed to encode metadata JSON: {e}")))?;
        Ok(Self {
            bytes,
            file_name: "metadata.json".to_string(),
            content_type: "application/json".to_string(),
            kind: AssetKind::Json,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedAsset {
    pub secure_url: String,
    pub folder: String,
    pub resource_type: String,
}

#[derive(Error, Debug)]
pub enum UploadError {
    /// The provider answered with an error status
    #[error("storage provider rejected the upload ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("network failure talking to storage provider: {0}")]
    Network(String),

    #[error("storage provider response had no secure_url")]
    MissingUrl,

    #[error("asset not found: {0}")]
    NotFound(String),
}

impl UploadError {
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Network(_) => true,
            UploadError::Rejected { status, .. } => *status >= 500 || *status == 429,
            UploadError::MissingUrl | UploadError::NotFound(_) => false,
        }
    }
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Upload bytes; the store does not re-validate type or size
    async fn upload(&self, upload: PendingUpload) -> Result<UploadedAsset, UploadError>;

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, UploadError>;
}

/// Reject logos the storage preset would refuse anyway.
pub fn validate_logo(bytes: &[u8], content_type: &str) -> Result<(), FeeGateError> {
    if bytes.is_empty() {
        return Err(FeeGateError::validation("logo file is empty"));
    }
    if bytes.len() > MAX_LOGO_BYTES {
        return Err(FeeGateError::validation(format!(
            "logo is {} bytes; the limit is 5 MB",
            bytes.len()
        )));
    }
    let content_type = content_type.trim().to_ascii_lowercase();
    if !ACCEPTED_IMAGE_TYPES.contains(&content_type.as_str()) {
        return Err(FeeGateError::validation(format!(
            "logo type {content_type:?} is not supported; use JPEG, PNG or WebP"
        )));
    }
    Ok(())
}

/// URLs produced by a metadata upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataUris {
    pub image: Option<String>,
    pub metadata: String,
    pub document: TokenMetadataDocument,
}

async fn upload_one(store: &dyn AssetStore, upload: PendingUpload) -> Result<UploadedAsset, FeeGateError> {
    let kind = upload.kind;
    let timer = Timer::new();
    match store.upload(upload).await {
        Ok(asset) => {
            timer.observe_duration(&metrics().upload_latency);
            metrics()
                .uploads_total
                .with_label_values(&[kind.resource_type()])
                .inc();
            info!(url = %asset.secure_url, folder = %asset.folder, "asset uploaded");
            Ok(asset)
        }
        Err(err) => {
            metrics().upload_failures.inc();
            warn!(kind = ?kind, error = %err, "asset upload failed");
            Err(err.into())
        }
    }
}

/// Upload the optional logo, embed its URL, then upload the JSON document.
///
/// A failure at either step fails the whole call; an already uploaded logo
/// is left orphaned.
pub async fn upload_token_metadata(
    store: &dyn AssetStore,
    logo: Option<LogoFile>,
    mut document: TokenMetadataDocument,
) -> Result<MetadataUris, FeeGateError> {
    let image = match logo {
        Some(logo) => {
            let content_type = logo.content_type.clone();
            let asset = upload_one(store, PendingUpload::image(logo)).await?;
            document.set_image(&asset.secure_url, &content_type);
            Some(asset.secure_url)
        }
        None => None,
    };

    let json = PendingUpload::json(&document)?;
    let metadata = upload_one(store, json).await?.secure_url;

    Ok(MetadataUris {
        image,
        metadata,
        document,
    })
}

/// Download and decode an off-chain metadata document.
pub async fn fetch_metadata_document(
    store: &dyn AssetStore,
    url: &str,
) -> Result<TokenMetadataDocument, FeeGateError> {
    let bytes = store.fetch(url).await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        FeeGateError::validation(format!("metadata at {url} is not a valid document: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SocialLinks;
    use memory::InMemoryAssetStore;

    fn png(len: usize) -> LogoFile {
        LogoFile {
            bytes: vec![0x89; len],
            file_name: "logo.png".to_string(),
            content_type: "image/png".to_string(),
        }
    }

    #[test]
    fn test_validate_logo_limits() {
        assert!(validate_logo(&[1; 10], "image/png").is_ok());
        assert!(validate_logo(&[1; 10], "IMAGE/WEBP").is_ok());
        assert!(validate_logo(&vec![1; MAX_LOGO_BYTES], "image/jpeg").is_ok());
        assert!(validate_logo(&vec![1; MAX_LOGO_BYTES + 1], "image/jpeg").is_err());
        assert!(validate_logo(&[1; 10], "image/gif").is_err());
        assert!(validate_logo(&[], "image/png").is_err());
    }

    #[tokio::test]
    async fn test_logo_url_embedded_before_json_upload() {
        let store = InMemoryAssetStore::new();
        let doc = TokenMetadataDocument::new("Gate", "GATE", "desc", SocialLinks::default());

        let uris = upload_token_metadata(&store, Some(png(16)), doc).await.unwrap();
        let image = uris.image.clone().unwrap();
        assert!(image.contains("token-logos"));
        assert!(uris.metadata.contains("token-metadata"));

        let fetched = fetch_metadata_document(&store, &uris.metadata).await.unwrap();
        assert_eq!(fetched.image.as_deref(), Some(image.as_str()));
        assert_eq!(fetched.properties.files[0].file_type, "image/png");
        assert_eq!(fetched, uris.document);
    }

    #[tokio::test]
    async fn test_json_only_upload() {
        let store = InMemoryAssetStore::new();
        let doc = TokenMetadataDocument::new("Gate", "GATE", "", SocialLinks::default());
        let uris = upload_token_metadata(&store, None, doc.clone()).await.unwrap();
        assert!(uris.image.is_none());
        assert_eq!(store.upload_count(), 1);
        assert_eq!(fetch_metadata_document(&store, &uris.metadata).await.unwrap(), doc);
    }

    #[tokio::test]
    async fn test_json_failure_after_logo_is_an_upload_error() {
        let store = InMemoryAssetStore::new();
        store.fail_uploads_of(AssetKind::Json);
        let doc = TokenMetadataDocument::new("Gate", "GATE", "", SocialLinks::default());

        let err = upload_token_metadata(&store, Some(png(4)), doc).await.unwrap_err();
        assert!(matches!(err, FeeGateError::Upload(_)));
        // the logo went through and is now orphaned
        assert_eq!(store.upload_count(), 1);
    }
}
