//! Error types for the DB tool server.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Every variant belongs to one category of the server's error taxonomy (protocol,
//! validation, not-found, pool exhaustion, datastore, internal). The category is
//! reported both in the JSON-RPC error code and in the `kind` metric label, so
//! operators can tell client misuse apart from backend health issues.

use rmcp::model::ErrorCode;
use thiserror::Error;

/// JSON-RPC error codes used on the wire.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const POOL_EXHAUSTED: i32 = -32001;
    pub const NOT_FOUND: i32 = -32002;
    pub const DATASTORE_ERROR: i32 = -32003;
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    #[error("Query rejected: {reason}")]
    QueryRejected { reason: String },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    #[error("Connection pool exhausted after waiting {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "SQLITE_BUSY" style extended code or "1" for SQLITE_ERROR
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a parse error for an envelope that is not valid JSON.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create an invalid request error (malformed envelope or negotiation order).
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a method not found error.
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            method: method.into(),
        }
    }

    /// Create an invalid params error.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Create a query rejected error.
    pub fn query_rejected(reason: impl Into<String>) -> Self {
        Self::QueryRejected {
            reason: reason.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    /// Create a tool not found error.
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound { name: name.into() }
    }

    /// Create a pool exhausted error.
    pub fn pool_exhausted(waited_ms: u64) -> Self {
        Self::PoolExhausted { waited_ms }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::PoolExhausted { .. } => Some("Retry the call once load decreases"),
            Self::ToolNotFound { .. } => Some("Call tools/list to see the registered tools"),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PoolExhausted { .. } | Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::Database {
                sql_state: Some(code),
                ..
            } => is_lock_contention(code),
            _ => false,
        }
    }

    /// Error-kind label used in logs and the `tool_errors_total` metric.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse { .. } | Self::InvalidRequest { .. } | Self::MethodNotFound { .. } => {
                "protocol"
            }
            Self::InvalidParams { .. } | Self::QueryRejected { .. } | Self::Schema { .. } => {
                "validation"
            }
            Self::ToolNotFound { .. } => "not_found",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::PoolClosed
            | Self::Connection { .. }
            | Self::Database { .. }
            | Self::Timeout { .. } => "datastore",
            Self::Internal { .. } => "internal",
        }
    }

    /// Message that is safe to write to server logs alongside sanitized params.
    ///
    /// Parameter deserialization failures can echo the offending value back, so
    /// they are summarized instead of logged verbatim.
    pub fn log_message(&self) -> String {
        match self {
            Self::InvalidParams { .. } => "parameters did not match the tool input schema".into(),
            _ => self.to_string(),
        }
    }
}

/// Primary SQLite result code (low byte of the extended code sqlx reports).
fn sqlite_primary_code(code: &str) -> Option<i32> {
    code.parse::<i32>().ok().map(|c| c & 0xff)
}

/// `SQLITE_BUSY` or `SQLITE_LOCKED`: another connection holds the lock.
fn is_lock_contention(code: &str) -> bool {
    matches!(sqlite_primary_code(code), Some(5 | 6))
}

fn sqlite_suggestion(code: Option<&str>) -> &'static str {
    match code.and_then(sqlite_primary_code) {
        Some(5 | 6) => "The database is locked by another writer; retry the call",
        Some(8) => "The datastore is opened read-only",
        Some(11 | 26) => "The database file is corrupt or is not a SQLite database",
        Some(14) => "Check that the database file exists and is readable",
        Some(19) => "The statement violates a table constraint",
        _ => "Check the SQL syntax and referenced objects",
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                let suggestion = sqlite_suggestion(code.as_deref());
                DbError::database(db_err.message(), code, suggestion)
            }
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the database path and open flags",
            ),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check that the database file is accessible",
            ),
            sqlx::Error::WorkerCrashed => DbError::connection(
                "SQLite worker thread stopped",
                "The connection will be replaced on the next checkout",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::schema(format!("Column not found: {}", col), col)
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            other => DbError::internal(format!("Unexpected datastore error: {}", other)),
        }
    }
}

/// Result type alias for server operations.
pub type DbResult<T> = Result<T, DbError>;

/// Build the `data` object attached to an error response.
fn error_data(err: &DbError) -> Option<serde_json::Value> {
    let mut data = serde_json::Map::new();
    if let Some(suggestion) = err.suggestion() {
        data.insert("suggestion".into(), suggestion.into());
    }
    if err.is_retryable() {
        data.insert("retryable".into(), true.into());
    }
    if let DbError::Database {
        sql_state: Some(code),
        ..
    } = err
    {
        data.insert("sql_state".into(), code.clone().into());
    }
    data.insert("kind".into(), err.kind().into());
    Some(serde_json::Value::Object(data))
}

/// Convert DbError to the JSON-RPC error object sent to the caller.
///
/// Datastore and internal failures get a generic message; their detail only
/// reaches the server-side log.
impl From<DbError> for rmcp::ErrorData {
    fn from(err: DbError) -> Self {
        let data = error_data(&err);
        let (code, message) = match &err {
            DbError::Parse { .. } => (codes::PARSE_ERROR, err.to_string()),
            DbError::InvalidRequest { .. } => (codes::INVALID_REQUEST, err.to_string()),
            DbError::MethodNotFound { .. } => (codes::METHOD_NOT_FOUND, err.to_string()),

            DbError::InvalidParams { .. }
            | DbError::QueryRejected { .. }
            | DbError::Schema { .. } => (codes::INVALID_PARAMS, err.to_string()),

            DbError::ToolNotFound { .. } => (codes::NOT_FOUND, err.to_string()),

            DbError::PoolExhausted { .. } => (codes::POOL_EXHAUSTED, err.to_string()),

            DbError::PoolClosed
            | DbError::Connection { .. }
            | DbError::Database { .. }
            | DbError::Timeout { .. } => (
                codes::DATASTORE_ERROR,
                "Datastore operation failed".to_string(),
            ),

            DbError::Internal { .. } => (codes::INTERNAL_ERROR, "Internal error".to_string()),
        };
        rmcp::ErrorData::new(ErrorCode(code), message, data)
    }
}
