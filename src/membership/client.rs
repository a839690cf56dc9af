//! HTTP client for a remote membership service

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use super::{MembershipBackend, MembershipStatus, Plan};
use crate::errors::FeeGateError;

pub struct HttpMembershipClient {
    http: Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest<'a> {
    plan_id: &'a str,
    wallet_address: String,
    signature: &'a str,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

impl HttpMembershipClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FeeGateError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeeGateError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn error_text(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.error)
            .unwrap_or(body);
        format!("{status}: {message}")
    }
}

#[async_trait]
impl MembershipBackend for HttpMembershipClient {
    async fn fetch_status(&self, wallet: &Pubkey) -> Result<MembershipStatus, FeeGateError> {
        let response = self
            .http
            .get(format!("{}/membership/status", self.base_url))
            .query(&[("wallet", wallet.to_string())])
            .send()
            .await
            .map_err(|e| FeeGateError::MembershipLookup(e.to_string()))?;
        if !response.status().is_success() {
            return Err(FeeGateError::MembershipLookup(Self::error_text(response).await));
        }
        response
            .json()
            .await
            .map_err(|e| FeeGateError::MembershipLookup(format!("unreadable status: {e}")))
    }

    async fn record_onchain_purchase(
        &self,
        wallet: &Pubkey,
        plan: Plan,
        signature: &str,
    ) -> Result<MembershipStatus, FeeGateError> {
        let response = self
            .http
            .post(format!("{}/membership/update", self.base_url))
            .json(&UpdateRequest {
                plan_id: plan.id(),
                wallet_address: wallet.to_string(),
                signature,
            })
            .send()
            .await
            .map_err(|e| FeeGateError::Storage(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(FeeGateError::validation(Self::error_text(response).await));
        }
        if !status.is_success() {
            return Err(FeeGateError::Storage(Self::error_text(response).await));
        }
        self.fetch_status(wallet).await
    }
}
