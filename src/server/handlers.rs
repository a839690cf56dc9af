use std::str::FromStr;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use tracing::{error, info, warn};

use super::stripe::{parse_event, CheckoutSession, WebhookError, CHECKOUT_COMPLETED};
use super::AppState;
use crate::errors::FeeGateError;
use crate::membership::{MembershipStatus, Plan, PurchaseProof};
use crate::metrics::metrics;

/// JSON error body: `{error, details?}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    details: Option<String>,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.details {
            Some(details) => json!({ "error": self.message, "details": details }),
            None => json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<FeeGateError> for ApiError {
    fn from(err: FeeGateError) -> Self {
        let status = match &err {
            FeeGateError::Validation(_) | FeeGateError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
            FeeGateError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            FeeGateError::Rpc(_) | FeeGateError::ConfirmationTimeout { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(category = err.category(), error = %err, "request failed");
        }
        Self {
            status,
            message: err.user_message(),
            details: None,
        }
    }
}

fn parse_wallet(raw: Option<&str>) -> Result<Pubkey, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("Wallet address is required"))?;
    Pubkey::from_str(raw).map_err(|_| ApiError::bad_request("Invalid wallet address"))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    wallet: Option<String>,
}

/// `GET /membership/status?wallet=`
pub async fn membership_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<MembershipStatus>, ApiError> {
    let wallet = parse_wallet(query.wallet.as_deref())?;
    Ok(Json(state.membership.get_status(&wallet).await))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBody {
    plan_id: Option<String>,
    wallet_address: Option<String>,
    signature: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    success: bool,
}

/// `POST /membership/update`
pub async fn membership_update(
    State(state): State<AppState>,
    Json(body): Json<UpdateBody>,
) -> Result<Json<UpdateResponse>, ApiError> {
    let wallet = parse_wallet(body.wallet_address.as_deref())?;
    let plan_id = body
        .plan_id
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Plan ID is required"))?;
    let plan = Plan::from_str(plan_id).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let signature = body.signature.as_deref().map(str::trim).filter(|s| !s.is_empty());
    match signature {
        Some(sig) if state.membership.verifies_onchain_payments() => {
            state
                .membership
                .confirm_onchain_purchase(&wallet, plan, sig)
                .await?;
        }
        Some(sig) => {
            state
                .membership
                .activate(&wallet, plan, PurchaseProof::OnChain(sig.to_string()))
                .await?;
        }
        None if state.allow_unverified_updates && !state.membership.verifies_onchain_payments() => {
            warn!(wallet = %wallet, plan = %plan, "activating membership without a payment signature");
            state
                .membership
                .activate(&wallet, plan, PurchaseProof::Unverified)
                .await?;
        }
        None => return Err(ApiError::bad_request("Payment signature is required")),
    }
    Ok(Json(UpdateResponse { success: true }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    price_id: Option<String>,
    wallet_address: Option<String>,
}

/// `POST /create-checkout-session`
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Json(body): Json<CheckoutBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stripe = state.stripe.as_ref().ok_or_else(|| ApiError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        message: "Card payments are not configured".to_string(),
        details: None,
    })?;
    let price_id = body
        .price_id
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Price ID is required"))?;
    let plan = stripe
        .plan_for_price(price_id)
        .ok_or_else(|| ApiError::bad_request("Invalid price ID"))?;
    let wallet = parse_wallet(body.wallet_address.as_deref())?;

    match stripe.create_checkout_session(price_id, plan, &wallet).await {
        Ok(id) => {
            info!(wallet = %wallet, plan = %plan, session_id = %id, "checkout session created");
            Ok(Json(json!({ "id": id })))
        }
        Err(err) => {
            error!(wallet = %wallet, error = %err, "checkout session creation failed");
            Err(ApiError {
                status: StatusCode::BAD_GATEWAY,
                message: "Failed to create checkout session".to_string(),
                details: None,
            }
            .with_details(err.to_string()))
        }
    }
}

fn webhook_rejected(err: WebhookError) -> ApiError {
    metrics().webhook_events.with_label_values(&["rejected"]).inc();
    warn!(error = %err, "webhook rejected");
    ApiError::bad_request("Webhook error").with_details(err.to_string())
}

/// `POST /stripe-webhook`
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let verifier = state.webhook.as_ref().ok_or_else(|| ApiError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        message: "Webhook secret is not configured".to_string(),
        details: None,
    })?;
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::MissingSignature)
        .map_err(webhook_rejected)?;
    let now_secs = state.clock.now_ms() / 1000;
    verifier
        .verify(signature, &body, now_secs)
        .map_err(webhook_rejected)?;

    let event = parse_event(&body).map_err(webhook_rejected)?;
    if event.event_type != CHECKOUT_COMPLETED {
        metrics().webhook_events.with_label_values(&["ignored"]).inc();
        return Ok(Json(json!({ "received": true })));
    }

    let session: CheckoutSession = serde_json::from_value(event.data.object)
        .map_err(|e| webhook_rejected(WebhookError::InvalidPayload(e.to_string())))?;
    if !session.is_paid() {
        metrics().webhook_events.with_label_values(&["ignored"]).inc();
        info!(session_id = %session.id, status = ?session.payment_status, "checkout not paid; ignoring");
        return Ok(Json(json!({ "received": true })));
    }

    let wallet = session
        .metadata
        .get("walletAddress")
        .ok_or_else(|| WebhookError::InvalidPayload("no walletAddress in session metadata".to_string()))
        .and_then(|w| {
            Pubkey::from_str(w)
                .map_err(|_| WebhookError::InvalidPayload(format!("invalid walletAddress {w:?}")))
        })
        .map_err(webhook_rejected)?;
    let plan = session
        .metadata
        .get("membershipType")
        .ok_or_else(|| WebhookError::InvalidPayload("no membershipType in session metadata".to_string()))
        .and_then(|p| Plan::from_str(p).map_err(|e| WebhookError::InvalidPayload(e.to_string())))
        .map_err(webhook_rejected)?;

    match state
        .membership
        .activate(&wallet, plan, PurchaseProof::Checkout(session.id.clone()))
        .await
    {
        Ok(status) => {
            metrics().webhook_events.with_label_values(&["activated"]).inc();
            info!(wallet = %wallet, plan = %plan, session_id = %session.id, expires_at = status.expires_at, "card membership activated");
            Ok(Json(json!({ "received": true })))
        }
        Err(err) => {
            // non-2xx makes the provider redeliver
            metrics().webhook_events.with_label_values(&["failed"]).inc();
            Err(err.into())
        }
    }
}

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

/// `GET /metrics`
pub async fn metrics_text() -> Response {
    match metrics().render() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "metrics rendering failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
