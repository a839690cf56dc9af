//! HTTP surface: membership API, card checkout and webhook, health, metrics

pub mod handlers;
pub mod stripe;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::clock::Clock;
use crate::membership::service::MembershipService;
use stripe::{StripeClient, WebhookVerifier};

/// Shared state for axum handlers
#[derive(Clone)]
pub struct AppState {
    pub membership: Arc<MembershipService>,
    /// `None` when card payments are not configured
    pub stripe: Option<Arc<StripeClient>>,
    pub webhook: Option<Arc<WebhookVerifier>>,
    pub clock: Arc<dyn Clock>,
    /// Activate updates that carry no payment signature
    pub allow_unverified_updates: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/membership/status", get(handlers::membership_status))
        .route("/membership/update", post(handlers::membership_update))
        .route("/create-checkout-session", post(handlers::create_checkout_session))
        .route("/stripe-webhook", post(handlers::stripe_webhook))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_text))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(state: AppState, bind_addr: &str) -> Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {bind_addr}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(addr = %addr, card_payments = state.stripe.is_some(), "membership server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("server error")?;
    Ok(())
}
