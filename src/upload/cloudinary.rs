//! Cloudinary unsigned-upload client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{AssetStore, PendingUpload, UploadError, UploadedAsset};
use crate::config::StorageConfig;
use crate::errors::FeeGateError;

#[derive(Debug, Clone)]
pub struct CloudinaryStore {
    http: Client,
    api_base: String,
    cloud_name: String,
    upload_preset: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorMessage,
}

#[derive(Deserialize)]
struct ErrorMessage {
    message: String,
}

impl CloudinaryStore {
    pub fn new(cfg: &StorageConfig) -> Result<Self, FeeGateError> {
        if cfg.cloud_name.trim().is_empty() {
            return Err(FeeGateError::config("storage cloud name is not set"));
        }
        if cfg.upload_preset.trim().is_empty() {
            return Err(FeeGateError::config("storage upload preset is not set"));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| FeeGateError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            cloud_name: cfg.cloud_name.trim().to_string(),
            upload_preset: cfg.upload_preset.trim().to_string(),
        })
    }

    fn upload_url(&self, resource_type: &str) -> String {
        format!("{}/{}/{}/upload", self.api_base, self.cloud_name, resource_type)
    }
}

async fn rejection(response: reqwest::Response) -> UploadError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error.message)
        .unwrap_or(text);
    UploadError::Rejected { status, message }
}

#[async_trait]
impl AssetStore for CloudinaryStore {
    async fn upload(&self, upload: PendingUpload) -> Result<UploadedAsset, UploadError> {
        let folder = upload.kind.folder();
        let resource_type = upload.kind.resource_type();

        let part = Part::bytes(upload.bytes)
            .file_name(upload.file_name)
            .mime_str(&upload.content_type)
            .map_err(|e| UploadError::Network(format!("invalid content type: {e}")))?;
        let form = Form::new()
            .part("file", part)
            .text("upload_preset", self.upload_preset.clone())
            .text("folder", folder)
            .text("resource_type", resource_type);

        let url = self.upload_url(resource_type);
        debug!(url = %url, folder, "uploading asset");
        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| UploadError::Network(format!("unreadable upload response: {e}")))?;
        let secure_url = body.secure_url.ok_or(UploadError::MissingUrl)?;

        Ok(UploadedAsset {
            secure_url,
            folder: folder.to_string(),
            resource_type: resource_type.to_string(),
        })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, UploadError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| UploadError::Network(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(UploadError::NotFound(url.to_string()));
        }
        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| UploadError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
