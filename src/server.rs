//! Server assembly.
//!
//! Wires the pool, validator, executor, metrics and tool registry together
//! from a [`Config`]. The binary and the integration tests both start here.

use crate::config::Config;
use crate::db::{QueryExecutor, SqliteConnectionManager, SqlitePool};
use crate::error::{DbError, DbResult};
use crate::mcp::{Dispatcher, ToolRegistry};
use crate::observability::exporter::MetricsExporter;
use crate::observability::{Metrics, Observability};
use crate::tools::{QueryValidator, ToolContext, register_builtin};
use std::sync::Arc;
use tracing::info;

/// A fully wired server, ready to be attached to a transport.
pub struct Server {
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<Metrics>,
}

impl Server {
    /// Build every component described by `config`.
    ///
    /// The pool is created empty; no connection is opened until the first
    /// tool call that needs one.
    pub fn from_config(config: &Config) -> DbResult<Self> {
        let manager = SqliteConnectionManager::new(&config.database, config.writable)?;
        let pool = SqlitePool::new(manager, config.pool_config());

        let validator = QueryValidator::new(config.validator_config());
        let executor = QueryExecutor::new(config.query_timeout_duration(), config.max_rows);
        let context = ToolContext::new(pool, validator, executor);

        let metrics = Arc::new(
            Metrics::new()
                .map_err(|e| DbError::internal(format!("Failed to register metrics: {}", e)))?,
        );
        let observability =
            Observability::new(Arc::clone(&metrics), config.observability_config());

        let registry = register_builtin(ToolRegistry::builder())
            .layer(observability)
            .build()?;

        info!(
            database = %config.database,
            writable = config.writable,
            tools = registry.len(),
            "Server assembled"
        );

        Ok(Self {
            dispatcher: Arc::new(Dispatcher::new(registry, context)),
            metrics,
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn pool(&self) -> &SqlitePool {
        self.dispatcher.context().pool()
    }

    /// HTTP exporter for this server's metrics and pool health.
    pub fn metrics_exporter(&self, bind_addr: impl Into<String>) -> MetricsExporter {
        MetricsExporter::new(Arc::clone(&self.metrics), self.pool().clone(), bind_addr)
    }
}
