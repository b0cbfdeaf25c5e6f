//! Logging and metrics around tool invocations.
//!
//! [`Observability`] is a [`ToolLayer`](crate::mcp::registry::ToolLayer): it is
//! composed around every registered handler when the registry is built and
//! never changes a handler's result.

pub mod context;
pub mod exporter;
pub mod instrument;
pub mod metrics;
pub mod redact;

pub use context::RequestContext;
pub use metrics::Metrics;
pub use redact::{REDACTED, sanitize_params};

use crate::config::DEFAULT_SLOW_CALL_THRESHOLD_MS;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// Calls slower than this are logged at warn and counted as slow
    pub slow_call_threshold: Duration,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            slow_call_threshold: Duration::from_millis(DEFAULT_SLOW_CALL_THRESHOLD_MS),
        }
    }
}

/// Shared handle to the metrics collector plus the instrumentation settings.
#[derive(Clone)]
pub struct Observability {
    metrics: Arc<Metrics>,
    config: ObservabilityConfig,
}

impl Observability {
    pub fn new(metrics: Arc<Metrics>, config: ObservabilityConfig) -> Self {
        Self { metrics, config }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn config(&self) -> &ObservabilityConfig {
        &self.config
    }
}
