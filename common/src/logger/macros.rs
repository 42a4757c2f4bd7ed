use tracing::{Level, Span};

use super::TraceId;

/// Root span for a request / reconcile tick / workflow execution.
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::span!(Level::INFO, "root", name = %name, trace_id = %trace_id.as_str())
}

/// Child span inheriting the current span's trace_id.
pub fn child_span(name: &'static str) -> Span {
    tracing::span!(Level::INFO, "child", name = %name)
}
