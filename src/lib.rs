//! DB Tool Server Library
//!
//! A tool-invocation server that exposes an embedded SQLite datastore to
//! clients over newline-delimited JSON-RPC. Connections come from a bounded
//! pool with overflow, ad-hoc queries pass a pattern-based safety check, and
//! every tool call is logged and counted.

pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod observability;
pub mod server;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use error::{DbError, DbResult};
pub use server::Server;
