//! Query execution engine.
//!
//! This module runs already-validated SQL on a checked-out SQLite connection:
//! - Parameterized queries (positional `?` placeholders)
//! - Row caps (enforced via streaming - only fetches needed rows)
//! - Query timeouts

use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, QueryResult};
use futures_util::StreamExt;
use sqlx::SqliteConnection;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Query executor that handles database query execution.
#[derive(Debug, Clone, Copy)]
pub struct QueryExecutor {
    query_timeout: Duration,
    row_limit: usize,
}

impl QueryExecutor {
    /// Create a new query executor.
    pub fn new(query_timeout: Duration, row_limit: u64) -> Self {
        Self {
            query_timeout,
            row_limit: usize::try_from(row_limit).unwrap_or(usize::MAX),
        }
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Execute a SELECT query and return results.
    pub async fn fetch(
        &self,
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<QueryResult> {
        let start = Instant::now();

        debug!(
            params = ?params.iter().map(QueryParam::storage_class).collect::<Vec<_>>(),
            limit = self.row_limit,
            timeout_secs = self.query_timeout.as_secs(),
            "Executing query"
        );

        let rows = fetch_rows(conn, sql, params, self.row_limit, self.query_timeout).await?;
        Ok(process_rows(rows, self.row_limit, start))
    }
}

/// Convert fetched rows into a QueryResult.
fn process_rows(rows: Vec<SqliteRow>, row_limit: usize, start: Instant) -> QueryResult {
    let execution_time_ms = start.elapsed().as_millis() as u64;

    let Some(first) = rows.first() else {
        return QueryResult::empty(execution_time_ms);
    };

    let columns = first.get_column_metadata();
    let total_rows = rows.len();
    let truncated = total_rows > row_limit;

    let json_rows: Vec<_> = rows
        .iter()
        .take(row_limit)
        .map(|r| r.to_json_map())
        .collect();

    if truncated {
        warn!(limit = row_limit, "Query result truncated");
    }

    QueryResult {
        columns,
        row_count: json_rows.len(),
        rows: json_rows,
        truncated,
        execution_time_ms,
    }
}

async fn fetch_rows(
    conn: &mut SqliteConnection,
    sql: &str,
    params: &[QueryParam],
    row_limit: usize,
    query_timeout: Duration,
) -> DbResult<Vec<SqliteRow>> {
    // One extra row tells us whether the cap truncated the result
    let fetch_limit = row_limit.saturating_add(1);
    let mut query = sqlx::query(sql);
    for param in params {
        query = bind_param(query, param);
    }
    let rows_future = query.fetch(conn).take(fetch_limit).collect::<Vec<_>>();

    match timeout(query_timeout, rows_future).await {
        Ok(results) => results
            .into_iter()
            .map(|r| r.map_err(DbError::from))
            .collect(),
        Err(_) => Err(DbError::timeout(
            "query execution",
            query_timeout.as_secs(),
        )),
    }
}

fn bind_param<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        // SQLite doesn't have native JSON type, store as string
        QueryParam::Json(v) => query.bind(v.to_string()),
    }
}
