//! The `run_query` tool.
//!
//! The only tool that accepts caller-written SQL. The text goes through the
//! query validator before a connection is checked out, so rejected queries
//! never touch the pool.

use crate::error::{DbError, DbResult};
use crate::models::{ColumnMetadata, QueryParam, QueryResult};
use crate::tools::ToolContext;
use crate::tools::format::{OutputFormat, format_as_markdown, format_as_table};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

/// Input for the run_query tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RunQueryInput {
    /// A single SELECT statement. Comments, multiple statements and mutation keywords are rejected.
    pub sql: String,
    /// Positional parameters bound to `?` placeholders, in order
    #[serde(default)]
    pub params: Vec<QueryParam>,
    /// Output format: "json" returns rows, "table" an ASCII table, "markdown" a markdown table
    #[serde(default)]
    pub format: OutputFormat,
}

/// Output from the run_query tool.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutput {
    /// Statement actually executed (with the appended LIMIT, if any)
    pub executed_sql: String,
    /// Column metadata. Empty if format is table/markdown.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ColumnMetadata>,
    /// Result rows as column-name maps. Empty if format is table/markdown.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    /// Rendered rows when format is table or markdown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted: Option<String>,
    /// True if the row cap cut the result short
    pub truncated: bool,
    pub row_count: usize,
    pub execution_time_ms: u64,
}

impl QueryOutput {
    pub fn from_result(executed_sql: String, result: QueryResult, format: OutputFormat) -> Self {
        let formatted = match format {
            OutputFormat::Json => None,
            OutputFormat::Table => Some(format_as_table(&result)),
            OutputFormat::Markdown => Some(format_as_markdown(&result)),
        };
        let (columns, rows) = if formatted.is_some() {
            (Vec::new(), Vec::new())
        } else {
            (result.columns, result.rows)
        };

        Self {
            executed_sql,
            columns,
            rows,
            formatted,
            truncated: result.truncated,
            row_count: result.row_count,
            execution_time_ms: result.execution_time_ms,
        }
    }
}

/// Validate, then execute on a pooled connection.
pub async fn run_query(ctx: ToolContext, input: RunQueryInput) -> DbResult<QueryOutput> {
    let sql = ctx.validator().validate(&input.sql).into_result()?;

    let mut conn = ctx.pool().acquire().await?;
    debug!(connection_id = conn.id(), params = input.params.len(), "Running query");

    match ctx.executor().fetch(&mut conn, &sql, &input.params).await {
        Ok(result) => Ok(QueryOutput::from_result(sql, result, input.format)),
        Err(err) => {
            // A timed-out statement may still be running on the handle
            if matches!(err, DbError::Connection { .. } | DbError::Timeout { .. }) {
                warn!(connection_id = conn.id(), error = %err, "Discarding connection");
                conn.mark_failed();
            }
            Err(err)
        }
    }
}
