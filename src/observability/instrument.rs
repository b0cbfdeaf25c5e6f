//! The instrumentation layer composed around every tool handler.

use crate::error::DbResult;
use crate::mcp::registry::{ToolFuture, ToolHandler, ToolLayer};
use crate::observability::{Metrics, Observability, RequestContext};
use crate::tools::ToolContext;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, error, info, info_span, warn};

impl ToolLayer for Observability {
    fn wrap(&self, tool: &str, handler: ToolHandler) -> ToolHandler {
        let obs = self.clone();
        let tool: Arc<str> = Arc::from(tool);
        Arc::new(
            move |mut ctx: ToolContext, params: JsonValue| -> ToolFuture {
                let request = RequestContext::new(tool.as_ref(), &params);
                ctx.set_correlation_id(request.correlation_id);

                let span = info_span!(
                    "tool_call",
                    tool = %request.tool_name,
                    correlation_id = %request.correlation_id
                );
                let metrics = Arc::clone(obs.metrics());
                let threshold = obs.config().slow_call_threshold;
                let handler = Arc::clone(&handler);

                Box::pin(
                    async move {
                        let call = CallRecord::start(metrics, threshold, request);
                        let result = handler(ctx, params).await;
                        call.finish(&result);
                        result
                    }
                    .instrument(span),
                )
            },
        )
    }
}

/// Accounts for one call from start to finish.
///
/// Dropping a record that was never finished (the handler panicked or the
/// call was abandoned) still counts an `internal` error and releases the
/// in-flight gauge.
struct CallRecord {
    metrics: Arc<Metrics>,
    slow_call_threshold: Duration,
    request: RequestContext,
    finished: bool,
}

impl CallRecord {
    fn start(metrics: Arc<Metrics>, slow_call_threshold: Duration, request: RequestContext) -> Self {
        info!(
            tool = %request.tool_name,
            correlation_id = %request.correlation_id,
            params = %request.sanitized_params,
            started_at = %request.started_at.to_rfc3339(),
            "Tool request started"
        );
        metrics.record_started(&request.tool_name);
        Self {
            metrics,
            slow_call_threshold,
            request,
            finished: false,
        }
    }

    fn finish(mut self, result: &DbResult<JsonValue>) {
        self.finished = true;
        let elapsed = self.request.elapsed();
        let duration_ms = elapsed.as_millis() as u64;
        let tool = self.request.tool_name.as_str();
        let correlation_id = self.request.correlation_id;

        match result {
            Ok(_) => {
                self.metrics.record_success(tool, elapsed);
                info!(tool, %correlation_id, duration_ms, "Tool request completed");
            }
            Err(err) => {
                self.metrics.record_error(tool, err.kind(), elapsed);
                error!(
                    tool,
                    %correlation_id,
                    duration_ms,
                    kind = err.kind(),
                    error = %err.log_message(),
                    params = %self.request.sanitized_params,
                    "Tool request failed"
                );
            }
        }

        if elapsed > self.slow_call_threshold {
            self.metrics.record_slow(tool);
            warn!(
                tool,
                %correlation_id,
                duration_ms,
                threshold_ms = self.slow_call_threshold.as_millis() as u64,
                "Slow tool request"
            );
        }
    }
}

impl Drop for CallRecord {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let elapsed = self.request.elapsed();
        self.metrics
            .record_error(&self.request.tool_name, "internal", elapsed);
        error!(
            tool = %self.request.tool_name,
            correlation_id = %self.request.correlation_id,
            duration_ms = elapsed.as_millis() as u64,
            params = %self.request.sanitized_params,
            "Tool request aborted before completing"
        );
    }
}
