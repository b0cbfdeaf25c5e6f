//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection pool management
//! - Query execution
//! - Schema introspection
//! - Type mappings

pub mod executor;
pub mod manager;
pub mod pool;
pub mod schema;
pub mod types;

pub use executor::QueryExecutor;
pub use manager::{ManageConnection, SqliteConnectionManager};
pub use pool::{ConnectionPool, ConnectionState, PoolConfig, PoolStats, PooledConnection};

/// The pool the server runs on.
pub type SqlitePool = ConnectionPool<SqliteConnectionManager>;

/// A connection checked out of [`SqlitePool`].
pub type SqlitePooledConnection = PooledConnection<SqliteConnectionManager>;
