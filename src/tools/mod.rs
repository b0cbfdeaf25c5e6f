//! Built-in datastore tools.
//!
//! This module contains the tool handlers the server ships with:
//! - `run_query`: Execute a validated, row-capped SELECT
//! - `list_tables`: List tables and views
//! - `describe_table`: Columns, keys and indexes of one table
//! - `pool_status`: Connection pool snapshot
//! - `sql_validator`: Pattern-based safety checks for caller-supplied SQL

pub mod format;
pub mod query;
pub mod schema;
pub mod sql_validator;
pub mod status;

pub use format::OutputFormat;
pub use query::{QueryOutput, RunQueryInput};
pub use schema::{DescribeTableInput, ListTablesInput};
pub use sql_validator::{QueryValidationResult, QueryValidator, RejectionReason, ValidatorConfig};
pub use status::PoolStatusInput;

use crate::db::{QueryExecutor, SqlitePool};
use crate::mcp::registry::ToolRegistryBuilder;
use std::sync::Arc;
use uuid::Uuid;

/// Shared services handed to every tool call.
///
/// Cheap to clone: the pool and validator are reference counted.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pool: SqlitePool,
    validator: Arc<QueryValidator>,
    executor: QueryExecutor,
    correlation_id: Option<Uuid>,
}

impl ToolContext {
    pub fn new(pool: SqlitePool, validator: QueryValidator, executor: QueryExecutor) -> Self {
        Self {
            pool,
            validator: Arc::new(validator),
            executor,
            correlation_id: None,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn validator(&self) -> &QueryValidator {
        &self.validator
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    /// Correlation id of the current call, set by the instrumentation layer.
    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    pub fn set_correlation_id(&mut self, id: Uuid) {
        self.correlation_id = Some(id);
    }
}

/// Register the built-in tools.
pub fn register_builtin(builder: ToolRegistryBuilder) -> ToolRegistryBuilder {
    builder
        .tool(
            "run_query",
            "Execute a read-only SELECT statement. Comments, multiple statements and \
             mutation keywords are rejected; a LIMIT is appended when missing. \
             Use ? placeholders with `params` for values.",
            query::run_query,
        )
        .tool(
            "list_tables",
            "List the tables (and optionally views) in the database with its on-disk size.",
            schema::list_tables,
        )
        .tool(
            "describe_table",
            "Get a table's columns, primary key, foreign keys and indexes.",
            schema::describe_table,
        )
        .tool(
            "pool_status",
            "Snapshot of the connection pool: size, idle and checked-out connections, \
             overflow use and lifecycle counters.",
            status::pool_status,
        )
}
