//! Card rail: Stripe checkout sessions and webhook verification

use std::collections::HashMap;
use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;
use tracing::debug;

use crate::config::StripeConfig;
use crate::errors::FeeGateError;
use crate::membership::Plan;

type HmacSha256 = Hmac<Sha256>;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

#[derive(Error, Debug)]
pub enum StripeError {
    #[error("Stripe request failed: {0}")]
    Network(String),

    #[error("Stripe returned {status}: {message}")]
    Api { status: u16, message: String },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing Stripe-Signature header")]
    MissingSignature,

    #[error("malformed Stripe-Signature header")]
    MalformedHeader,

    #[error("webhook timestamp is outside the tolerance window")]
    TimestampOutOfTolerance,

    #[error("no signature matches the payload")]
    SignatureMismatch,

    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),
}

pub struct StripeClient {
    http: Client,
    api_base: String,
    secret_key: String,
    weekly_price_id: String,
    monthly_price_id: String,
    success_url: String,
    cancel_url: String,
}

#[derive(Deserialize)]
struct SessionCreated {
    id: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl StripeClient {
    pub fn new(cfg: &StripeConfig) -> Result<Self, FeeGateError> {
        if cfg.secret_key.trim().is_empty() {
            return Err(FeeGateError::config("STRIPE_SECRET_KEY is not set"));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FeeGateError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            secret_key: cfg.secret_key.clone(),
            weekly_price_id: cfg.weekly_price_id.clone(),
            monthly_price_id: cfg.monthly_price_id.clone(),
            success_url: cfg.success_url.clone(),
            cancel_url: cfg.cancel_url.clone(),
        })
    }

    /// Plan sold under `price_id`; unknown ids are never guessed
    pub fn plan_for_price(&self, price_id: &str) -> Option<Plan> {
        if price_id.is_empty() {
            None
        } else if price_id == self.weekly_price_id {
            Some(Plan::Weekly)
        } else if price_id == self.monthly_price_id {
            Some(Plan::Monthly)
        } else {
            None
        }
    }

    /// Create a one-item payment session and return its id.
    pub async fn create_checkout_session(
        &self,
        price_id: &str,
        plan: Plan,
        wallet: &Pubkey,
    ) -> Result<String, StripeError> {
        let wallet = wallet.to_string();
        let form = [
            ("mode", "payment"),
            ("payment_method_types[0]", "card"),
            ("line_items[0][price]", price_id),
            ("line_items[0][quantity]", "1"),
            ("success_url", self.success_url.as_str()),
            ("cancel_url", self.cancel_url.as_str()),
            ("metadata[membershipType]", plan.id()),
            ("metadata[walletAddress]", wallet.as_str()),
        ];

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| StripeError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StripeError::Network(e.to_string()))?;
        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            return Err(StripeError::Api {
                status: status.as_u16(),
                message,
            });
        }
        let created: SessionCreated = serde_json::from_str(&body)
            .map_err(|e| StripeError::Network(format!("unreadable session response: {e}")))?;
        debug!(session_id = %created.id, plan = %plan, "checkout session created");
        Ok(created.id)
    }
}

/// Checks `Stripe-Signature` headers against the endpoint secret
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: u64,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance: Duration) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs: tolerance.as_secs(),
        }
    }

    /// Verify `header` (`t=<unix>,v1=<hex>[,v1=..]`) over `payload`.
    pub fn verify(&self, header: &str, payload: &[u8], now_secs: i64) -> Result<(), WebhookError> {
        let mut timestamp: Option<i64> = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or(WebhookError::MalformedHeader)?;
            match key {
                "t" => {
                    timestamp = Some(value.parse().map_err(|_| WebhookError::MalformedHeader)?)
                }
                "v1" => signatures.push(value),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
        if signatures.is_empty() {
            return Err(WebhookError::MalformedHeader);
        }
        if now_secs.abs_diff(timestamp) > self.tolerance_secs {
            return Err(WebhookError::TimestampOutOfTolerance);
        }

        for candidate in signatures {
            let Ok(expected) = hex::decode(candidate) else {
                continue;
            };
            if self.mac(timestamp, payload)?.verify_slice(&expected).is_ok() {
                return Ok(());
            }
        }
        Err(WebhookError::SignatureMismatch)
    }

    /// Hex signature for `payload` at `timestamp`, as Stripe computes it
    pub fn sign(&self, timestamp: i64, payload: &[u8]) -> Result<String, WebhookError> {
        Ok(hex::encode(self.mac(timestamp, payload)?.finalize().into_bytes()))
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, WebhookError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| WebhookError::SignatureMismatch)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }
}

pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent, WebhookError> {
    serde_json::from_slice(payload).map_err(|e| WebhookError::InvalidPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new("whsec_test", Duration::from_secs(300))
    }

    #[test]
    fn test_valid_signature() {
        let v = verifier();
        let body = br#"{"type":"ping"}"#;
        let header = format!("t={NOW},v1={}", v.sign(NOW, body).unwrap());
        assert_eq!(v.verify(&header, body, NOW + 10), Ok(()));
    }

    #[test]
    fn test_any_listed_signature_may_match() {
        let v = verifier();
        let body = b"{}";
        let header = format!("t={NOW},v1=deadbeef,v0=ignored,v1={}", v.sign(NOW, body).unwrap());
        assert_eq!(v.verify(&header, body, NOW), Ok(()));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let v = verifier();
        let header = format!("t={NOW},v1={}", v.sign(NOW, b"original").unwrap());
        assert_eq!(
            v.verify(&header, b"tampered", NOW),
            Err(WebhookError::SignatureMismatch)
        );
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let v = verifier();
        let header = format!("t={NOW},v1={}", v.sign(NOW, b"x").unwrap());
        assert_eq!(
            v.verify(&header, b"x", NOW + 301),
            Err(WebhookError::TimestampOutOfTolerance)
        );
    }

    #[test]
    fn test_extreme_timestamps_rejected() {
        let v = verifier();
        for ts in [i64::MIN, i64::MAX, -NOW] {
            let header = format!("t={ts},v1={}", v.sign(ts, b"x").unwrap());
            assert_eq!(
                v.verify(&header, b"x", NOW),
                Err(WebhookError::TimestampOutOfTolerance),
                "t={ts}"
            );
        }
    }

    #[test]
    fn test_malformed_headers() {
        let v = verifier();
        for header in ["", "garbage", "t=abc,v1=00", "v1=00", format!("t={NOW}").as_str()] {
            assert_eq!(
                v.verify(header, b"x", NOW),
                Err(WebhookError::MalformedHeader),
                "{header:?}"
            );
        }
    }

    #[test]
    fn test_parse_checkout_session() {
        let event = parse_event(
            br#"{"type":"checkout.session.completed","data":{"object":{
                "id":"cs_123","payment_status":"paid",
                "metadata":{"walletAddress":"abc","membershipType":"weekly"}}}}"#,
        )
        .unwrap();
        assert_eq!(event.event_type, CHECKOUT_COMPLETED);
        let session: CheckoutSession = serde_json::from_value(event.data.object).unwrap();
        assert!(session.is_paid());
        assert_eq!(session.metadata["membershipType"], "weekly");
    }

    #[tokio::test]
    async fn test_checkout_session_form() {
        let mut server = mockito::Server::new_async().await;
        let wallet = Pubkey::new_unique();
        let mock = server
            .mock("POST", "/v1/checkout/sessions")
            .match_header("authorization", "Bearer sk_test")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("mode".into(), "payment".into()),
                mockito::Matcher::UrlEncoded("line_items[0][price]".into(), "price_w".into()),
                mockito::Matcher::UrlEncoded("metadata[membershipType]".into(), "weekly".into()),
                mockito::Matcher::UrlEncoded("metadata[walletAddress]".into(), wallet.to_string()),
            ]))
            .with_status(200)
            .with_body(r#"{"id":"cs_test_1","object":"checkout.session"}"#)
            .create_async()
            .await;

        let client = StripeClient::new(&StripeConfig {
            api_base: server.url(),
            secret_key: "sk_test".to_string(),
            weekly_price_id: "price_w".to_string(),
            monthly_price_id: "price_m".to_string(),
            ..StripeConfig::default()
        })
        .unwrap();

        assert_eq!(client.plan_for_price("price_w"), Some(Plan::Weekly));
        assert_eq!(client.plan_for_price("price_x"), None);
        let id = client
            .create_checkout_session("price_w", Plan::Weekly, &wallet)
            .await
            .unwrap();
        assert_eq!(id, "cs_test_1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_checkout_provider_error_propagates() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/checkout/sessions")
            .with_status(400)
            .with_body(r#"{"error":{"message":"No such price: 'price_w'"}}"#)
            .create_async()
            .await;

        let client = StripeClient::new(&StripeConfig {
            api_base: server.url(),
            secret_key: "sk_test".to_string(),
            ..StripeConfig::default()
        })
        .unwrap();
        let err = client
            .create_checkout_session("price_w", Plan::Weekly, &Pubkey::new_unique())
            .await
            .unwrap_err();
        assert!(matches!(err, StripeError::Api { status: 400, message } if message.contains("No such price")));
    }
}
