//! Per-invocation request context.

use crate::observability::redact::sanitize_params;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Everything the instrumentation layer knows about one tool call.
///
/// Built when the call starts and dropped once its outcome is recorded.
/// Only the sanitized copy of the arguments is kept.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: Uuid,
    pub tool_name: String,
    pub sanitized_params: JsonValue,
    /// Wall-clock start, for log correlation across processes
    pub started_at: DateTime<Utc>,
    /// Monotonic start, for durations
    pub start_time: Instant,
}

impl RequestContext {
    pub fn new(tool_name: impl Into<String>, params: &JsonValue) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            tool_name: tool_name.into(),
            sanitized_params: sanitize_params(params),
            started_at: Utc::now(),
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}
