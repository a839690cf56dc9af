//! Metrics collection and export module

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Fees
    pub fees_charged_lamports: IntCounter,
    pub fee_member_discounts: IntCounter,

    // Transactions
    pub actions_total: IntCounterVec,
    pub transactions_submitted: IntCounter,
    pub transactions_confirmed: IntCounter,
    pub transactions_rejected: IntCounterVec,
    pub confirmation_timeouts: IntCounter,
    pub blockhash_resubmits: IntCounter,

    // Uploads
    pub uploads_total: IntCounterVec,
    pub upload_failures: IntCounter,

    // Membership
    pub membership_activations: IntCounterVec,
    pub membership_duplicate_purchases: IntCounter,
    pub membership_lookup_failures: IntCounter,
    pub webhook_events: IntCounterVec,

    // Histograms
    pub confirmation_latency: Histogram,
    pub upload_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let fees_charged_lamports = IntCounter::with_opts(Opts::new(
            "fees_charged_lamports_total",
            "Lamports of service fees included in submitted transactions",
        ))?;
        let fee_member_discounts = IntCounter::with_opts(Opts::new(
            "fee_member_discounts_total",
            "Gated actions charged the member fee instead of the base fee",
        ))?;

        let actions_total = IntCounterVec::new(
            Opts::new("actions_total", "Orchestrator actions by outcome"),
            &["action", "outcome"],
        )?;
        let transactions_submitted = IntCounter::with_opts(Opts::new(
            "transactions_submitted_total",
            "Transactions sent to the network",
        ))?;
        let transactions_confirmed = IntCounter::with_opts(Opts::new(
            "transactions_confirmed_total",
            "Transactions confirmed at the configured commitment",
        ))?;
        let transactions_rejected = IntCounterVec::new(
            Opts::new("transactions_rejected_total", "Rejected transactions by kind"),
            &["kind"],
        )?;
        let confirmation_timeouts = IntCounter::with_opts(Opts::new(
            "confirmation_timeouts_total",
            "Transactions whose outcome was unknown when confirmation gave up",
        ))?;
        let blockhash_resubmits = IntCounter::with_opts(Opts::new(
            "blockhash_resubmits_total",
            "Rebuilds after an expired blockhash",
        ))?;

        let uploads_total = IntCounterVec::new(
            Opts::new("uploads_total", "Successful asset uploads by kind"),
            &["kind"],
        )?;
        let upload_failures = IntCounter::with_opts(Opts::new(
            "upload_failures_total",
            "Failed asset uploads",
        ))?;

        let membership_activations = IntCounterVec::new(
            Opts::new("membership_activations_total", "Membership activations by payment rail"),
            &["rail"],
        )?;
        let membership_duplicate_purchases = IntCounter::with_opts(Opts::new(
            "membership_duplicate_purchases_total",
            "Activations skipped because the purchase was already applied",
        ))?;
        let membership_lookup_failures = IntCounter::with_opts(Opts::new(
            "membership_lookup_failures_total",
            "Membership reads that failed and resolved as inactive",
        ))?;
        let webhook_events = IntCounterVec::new(
            Opts::new("webhook_events_total", "Payment webhook deliveries by outcome"),
            &["outcome"],
        )?;

        let confirmation_latency = Histogram::with_opts(
            HistogramOpts::new(
                "confirmation_latency_seconds",
                "Time from submission to confirmation",
            )
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0, 90.0]),
        )?;
        let upload_latency = Histogram::with_opts(
            HistogramOpts::new("upload_latency_seconds", "Asset upload duration")
                .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0]),
        )?;

        registry.register(Box::new(fees_charged_lamports.clone()))?;
        registry.register(Box::new(fee_member_discounts.clone()))?;
        registry.register(Box::new(actions_total.clone()))?;
        registry.register(Box::new(transactions_submitted.clone()))?;
        registry.register(Box::new(transactions_confirmed.clone()))?;
        registry.register(Box::new(transactions_rejected.clone()))?;
        registry.register(Box::new(confirmation_timeouts.clone()))?;
        registry.register(Box::new(blockhash_resubmits.clone()))?;
        registry.register(Box::new(uploads_total.clone()))?;
        registry.register(Box::new(upload_failures.clone()))?;
        registry.register(Box::new(membership_activations.clone()))?;
        registry.register(Box::new(membership_duplicate_purchases.clone()))?;
        registry.register(Box::new(membership_lookup_failures.clone()))?;
        registry.register(Box::new(webhook_events.clone()))?;
        registry.register(Box::new(confirmation_latency.clone()))?;
        registry.register(Box::new(upload_latency.clone()))?;

        Ok(Self {
            registry,
            fees_charged_lamports,
            fee_member_discounts,
            actions_total,
            transactions_submitted,
            transactions_confirmed,
            transactions_rejected,
            confirmation_timeouts,
            blockhash_resubmits,
            uploads_total,
            upload_failures,
            membership_activations,
            membership_duplicate_purchases,
            membership_lookup_failures,
            webhook_events,
            confirmation_latency,
            upload_latency,
        })
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    pub fn record_action(&self, action: &str, outcome: &str) {
        self.actions_total.with_label_values(&[action, outcome]).inc();
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.elapsed_secs());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render_contains_registered_names() {
        let m = Metrics::new().unwrap();
        m.fees_charged_lamports.inc_by(50_000_000);
        m.record_action("burn_tokens", "ok");
        let text = m.render().unwrap();
        assert!(text.contains("fees_charged_lamports_total 50000000"));
        assert!(text.contains("actions_total{action=\"burn_tokens\",outcome=\"ok\"} 1"));
    }

    #[test]
    fn test_global_metrics_is_singleton() {
        let a = metrics() as *const Metrics;
        let b = metrics() as *const Metrics;
        assert_eq!(a, b);
    }
}
