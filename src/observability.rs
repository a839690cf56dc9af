//! Correlation ids for tracing one user action across components

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation ID for tracking one action across uploads, RPC calls and
/// membership writes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trace context for one orchestrator action or HTTP request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub correlation_id: CorrelationId,
    pub operation: String,
    /// Creation timestamp (Unix epoch milliseconds)
    pub timestamp_ms: i64,
}

impl TraceContext {
    pub fn new(operation: &str) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            span_id: Uuid::new_v4().to_string(),
            correlation_id: CorrelationId::new(),
            operation: operation.to_string(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// A `tracing` span carrying this context's ids
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "action",
            operation = %self.operation,
            trace_id = %self.trace_id,
            correlation_id = %self.correlation_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_carries_operation() {
        let ctx = TraceContext::new("create_token");
        assert_eq!(ctx.operation, "create_token");
        assert!(ctx.timestamp_ms > 0);
        let _entered = ctx.span().entered();
    }

    #[test]
    fn test_contexts_are_unique() {
        let a = TraceContext::new("burn");
        let b = TraceContext::new("burn");
        assert_ne!(a.trace_id, b.trace_id);
        assert_ne!(a.correlation_id, b.correlation_id);
    }
}
