//! Prometheus metrics for tool invocations and the connection pool.
//!
//! Every [`Metrics`] owns its own [`Registry`]; nothing is registered in the
//! prometheus default registry, so tests can build as many as they like.

use crate::db::PoolStats;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

pub const OUTCOME_STARTED: &str = "started";
pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_ERROR: &str = "error";

/// Latency buckets in seconds.
const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Metrics collector for tool calls and pool state.
pub struct Metrics {
    /// Tool requests by outcome (started, success, error)
    requests_total: IntCounterVec,

    /// Failed tool requests by error kind
    errors_total: IntCounterVec,

    /// Tool requests slower than the slow-call threshold
    slow_calls_total: IntCounterVec,

    /// Tool request duration in seconds
    request_duration_seconds: HistogramVec,

    /// Tool requests currently executing
    requests_in_flight: IntGaugeVec,

    /// Pool gauges: size, available, in_use, overflow_in_use
    pool_connections: IntGaugeVec,

    /// Connection lifecycle events: created, recycled, failed
    pool_events_total: IntCounterVec,

    /// Serializes pool snapshots so concurrent scrapes cannot double-count
    pool_sync: Mutex<()>,

    registry: Registry,
}

impl Metrics {
    /// Create a collector with a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("tool_requests_total", "Total number of tool requests by outcome"),
            &["tool", "outcome"],
        )?;

        let errors_total = IntCounterVec::new(
            Opts::new("tool_errors_total", "Total number of failed tool requests by kind"),
            &["tool", "kind"],
        )?;

        let slow_calls_total = IntCounterVec::new(
            Opts::new(
                "tool_slow_calls_total",
                "Tool requests that exceeded the slow-call threshold",
            ),
            &["tool"],
        )?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "tool_request_duration_seconds",
                "Tool request duration in seconds",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["tool"],
        )?;

        let requests_in_flight = IntGaugeVec::new(
            Opts::new(
                "tool_requests_in_flight",
                "Number of tool requests currently executing",
            ),
            &["tool"],
        )?;

        let pool_connections = IntGaugeVec::new(
            Opts::new("pool_connections", "Connection pool gauges by state"),
            &["state"],
        )?;

        let pool_events_total = IntCounterVec::new(
            Opts::new(
                "pool_connection_events_total",
                "Connection lifecycle events",
            ),
            &["event"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;
        registry.register(Box::new(slow_calls_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(requests_in_flight.clone()))?;
        registry.register(Box::new(pool_connections.clone()))?;
        registry.register(Box::new(pool_events_total.clone()))?;

        Ok(Self {
            requests_total,
            errors_total,
            slow_calls_total,
            request_duration_seconds,
            requests_in_flight,
            pool_connections,
            pool_events_total,
            pool_sync: Mutex::new(()),
            registry,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Count a started call and raise its in-flight gauge.
    pub fn record_started(&self, tool: &str) {
        self.requests_total
            .with_label_values(&[tool, OUTCOME_STARTED])
            .inc();
        self.requests_in_flight.with_label_values(&[tool]).inc();
    }

    pub fn record_success(&self, tool: &str, duration: Duration) {
        self.requests_total
            .with_label_values(&[tool, OUTCOME_SUCCESS])
            .inc();
        self.finish(tool, duration);
    }

    pub fn record_error(&self, tool: &str, kind: &str, duration: Duration) {
        self.requests_total
            .with_label_values(&[tool, OUTCOME_ERROR])
            .inc();
        self.errors_total.with_label_values(&[tool, kind]).inc();
        self.finish(tool, duration);
    }

    pub fn record_slow(&self, tool: &str) {
        self.slow_calls_total.with_label_values(&[tool]).inc();
    }

    fn finish(&self, tool: &str, duration: Duration) {
        self.request_duration_seconds
            .with_label_values(&[tool])
            .observe(duration.as_secs_f64());
        self.requests_in_flight.with_label_values(&[tool]).dec();
    }

    /// Copy a pool snapshot into the pool gauges and lifecycle counters.
    ///
    /// The pool keeps its own running totals; counters advance by the
    /// difference since the previous snapshot.
    pub fn record_pool_stats(&self, stats: &PoolStats) {
        let _guard = self.pool_sync.lock().unwrap_or_else(PoisonError::into_inner);

        for (state, value) in [
            ("size", stats.size),
            ("available", stats.available),
            ("in_use", stats.in_use),
            ("overflow_in_use", stats.overflow_in_use),
        ] {
            self.pool_connections
                .with_label_values(&[state])
                .set(value as i64);
        }

        for (event, total) in [
            ("created", stats.created_total),
            ("recycled", stats.recycled_total),
            ("failed", stats.failed_total),
        ] {
            let counter = self.pool_events_total.with_label_values(&[event]);
            let delta = total.saturating_sub(counter.get());
            if delta > 0 {
                counter.inc_by(delta);
            }
        }
    }

    /// Encode every registered metric in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn requests(&self, tool: &str, outcome: &str) -> u64 {
        self.requests_total
            .with_label_values(&[tool, outcome])
            .get()
    }

    pub fn errors(&self, tool: &str, kind: &str) -> u64 {
        self.errors_total.with_label_values(&[tool, kind]).get()
    }

    pub fn slow_calls(&self, tool: &str) -> u64 {
        self.slow_calls_total.with_label_values(&[tool]).get()
    }

    pub fn in_flight(&self, tool: &str) -> i64 {
        self.requests_in_flight.with_label_values(&[tool]).get()
    }

    /// Number of durations observed for `tool`.
    pub fn duration_samples(&self, tool: &str) -> u64 {
        self.request_duration_seconds
            .with_label_values(&[tool])
            .get_sample_count()
    }

    pub fn pool_gauge(&self, state: &str) -> i64 {
        self.pool_connections.with_label_values(&[state]).get()
    }

    pub fn pool_events(&self, event: &str) -> u64 {
        self.pool_events_total.with_label_values(&[event]).get()
    }
}
