//! Configuration handling for the DB tool server.
//!
//! This module provides configuration management via CLI arguments and environment variables.
//! The flat `Config` is split into typed per-component configs so the pool, validator and
//! observability layer can be constructed (and tested) without going through clap.

use clap::Parser;
use std::time::Duration;

use crate::db::PoolConfig;
use crate::observability::ObservabilityConfig;
use crate::tools::sql_validator::ValidatorConfig;

pub const DEFAULT_POOL_SIZE: usize = 10;
pub const DEFAULT_MAX_OVERFLOW: usize = 5;
pub const DEFAULT_CHECKOUT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_CONNECTION_AGE_SECS: u64 = 1800;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

// Query safety defaults
pub const DEFAULT_MAX_ROWS: u64 = 10_000;
pub const DEFAULT_MAX_JOINS: usize = 5;
pub const DEFAULT_MAX_SUBQUERIES: usize = 3;

pub const DEFAULT_SLOW_CALL_THRESHOLD_MS: u64 = 1000;
pub const DEFAULT_METRICS_HOST: &str = "127.0.0.1";
pub const DEFAULT_METRICS_PORT: u16 = 9090;

/// Configuration for the DB tool server.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-tool-server",
    about = "Tool-invocation server exposing a SQLite datastore over newline-delimited JSON-RPC",
    version,
    author
)]
pub struct Config {
    /// SQLite database file path or `sqlite:` URL
    #[arg(short = 'd', long = "database", value_name = "PATH", env = "MCP_DATABASE")]
    pub database: String,

    /// Open the datastore read-write (creates the file if missing)
    #[arg(long, env = "MCP_WRITABLE")]
    pub writable: bool,

    /// Number of connections the pool keeps
    #[arg(long, default_value_t = DEFAULT_POOL_SIZE, env = "MCP_POOL_SIZE")]
    pub pool_size: usize,

    /// Extra connections created on demand once the base pool is checked out
    #[arg(long, default_value_t = DEFAULT_MAX_OVERFLOW, env = "MCP_MAX_OVERFLOW")]
    pub max_overflow: usize,

    /// Pool checkout timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CHECKOUT_TIMEOUT_SECS,
        env = "MCP_CHECKOUT_TIMEOUT"
    )]
    pub checkout_timeout: u64,

    /// Maximum connection age in seconds before it is recycled
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_CONNECTION_AGE_SECS,
        env = "MCP_MAX_CONNECTION_AGE"
    )]
    pub max_connection_age: u64,

    /// Query timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_QUERY_TIMEOUT_SECS,
        env = "MCP_QUERY_TIMEOUT"
    )]
    pub query_timeout: u64,

    /// Row cap appended to (or enforced on) ad-hoc queries
    #[arg(long, default_value_t = DEFAULT_MAX_ROWS, env = "MCP_MAX_ROWS")]
    pub max_rows: u64,

    /// Maximum JOIN count in an ad-hoc query
    #[arg(long, default_value_t = DEFAULT_MAX_JOINS, env = "MCP_MAX_JOINS")]
    pub max_joins: usize,

    /// Maximum nested subquery count in an ad-hoc query
    #[arg(long, default_value_t = DEFAULT_MAX_SUBQUERIES, env = "MCP_MAX_SUBQUERIES")]
    pub max_subqueries: usize,

    /// Calls slower than this many milliseconds are logged and counted as slow
    #[arg(
        long,
        default_value_t = DEFAULT_SLOW_CALL_THRESHOLD_MS,
        env = "MCP_SLOW_CALL_THRESHOLD_MS"
    )]
    pub slow_call_threshold_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MCP_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "MCP_JSON_LOGS")]
    pub json_logs: bool,

    /// Enable logging output (disabled by default to avoid interfering with stdio transport)
    #[arg(long, env = "MCP_ENABLE_LOGS")]
    pub enable_logs: bool,

    /// Serve Prometheus metrics over HTTP
    #[arg(long = "metrics", env = "MCP_METRICS")]
    pub metrics_enabled: bool,

    /// Metrics HTTP host to bind to
    #[arg(long, default_value = DEFAULT_METRICS_HOST, env = "MCP_METRICS_HOST")]
    pub metrics_host: String,

    /// Metrics HTTP port to bind to
    #[arg(long, default_value_t = DEFAULT_METRICS_PORT, env = "MCP_METRICS_PORT")]
    pub metrics_port: u16,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration for the given datastore (useful for testing).
    pub fn for_database(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            writable: false,
            pool_size: DEFAULT_POOL_SIZE,
            max_overflow: DEFAULT_MAX_OVERFLOW,
            checkout_timeout: DEFAULT_CHECKOUT_TIMEOUT_SECS,
            max_connection_age: DEFAULT_MAX_CONNECTION_AGE_SECS,
            query_timeout: DEFAULT_QUERY_TIMEOUT_SECS,
            max_rows: DEFAULT_MAX_ROWS,
            max_joins: DEFAULT_MAX_JOINS,
            max_subqueries: DEFAULT_MAX_SUBQUERIES,
            slow_call_threshold_ms: DEFAULT_SLOW_CALL_THRESHOLD_MS,
            log_level: "info".to_string(),
            json_logs: false,
            enable_logs: false,
            metrics_enabled: false,
            metrics_host: DEFAULT_METRICS_HOST.to_string(),
            metrics_port: DEFAULT_METRICS_PORT,
        }
    }

    /// Reject settings that would make the server unusable.
    pub fn validate(&self) -> Result<(), String> {
        if self.database.trim().is_empty() {
            return Err("database path must not be empty".to_string());
        }
        if self.pool_size == 0 {
            return Err("pool_size must be greater than 0".to_string());
        }
        if self.checkout_timeout == 0 {
            return Err("checkout_timeout must be greater than 0".to_string());
        }
        if self.query_timeout == 0 {
            return Err("query_timeout must be greater than 0".to_string());
        }
        if self.max_rows == 0 {
            return Err("max_rows must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Get the metrics bind address.
    pub fn metrics_bind_addr(&self) -> String {
        format!("{}:{}", self.metrics_host, self.metrics_port)
    }

    /// Get the query timeout as a Duration.
    pub fn query_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            base_size: self.pool_size,
            max_overflow: self.max_overflow,
            checkout_timeout: Duration::from_secs(self.checkout_timeout),
            max_age: Duration::from_secs(self.max_connection_age),
        }
    }

    pub fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig {
            max_rows: self.max_rows,
            max_joins: self.max_joins,
            max_subqueries: self.max_subqueries,
        }
    }

    pub fn observability_config(&self) -> ObservabilityConfig {
        ObservabilityConfig {
            slow_call_threshold: Duration::from_millis(self.slow_call_threshold_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::for_database("data.db");
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.max_overflow, 5);
        assert_eq!(config.metrics_host, DEFAULT_METRICS_HOST);
        assert!(!config.writable);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_from_args() {
        let config = Config::try_parse_from([
            "db-tool-server",
            "--database",
            "/tmp/x.db",
            "--pool-size",
            "4",
            "--max-overflow",
            "2",
            "--slow-call-threshold-ms",
            "250",
            "--metrics",
        ])
        .unwrap();
        assert_eq!(config.database, "/tmp/x.db");
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.max_overflow, 2);
        assert_eq!(config.slow_call_threshold_ms, 250);
        assert!(config.metrics_enabled);
        assert_eq!(config.checkout_timeout, DEFAULT_CHECKOUT_TIMEOUT_SECS);
    }

    #[test]
    fn test_metrics_bind_addr() {
        let config = Config {
            metrics_host: "0.0.0.0".to_string(),
            metrics_port: 3000,
            ..Config::for_database("x.db")
        };
        assert_eq!(config.metrics_bind_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_component_configs() {
        let config = Config {
            checkout_timeout: 3,
            max_connection_age: 60,
            max_rows: 500,
            max_joins: 2,
            slow_call_threshold_ms: 20,
            ..Config::for_database("x.db")
        };

        let pool = config.pool_config();
        assert_eq!(pool.base_size, 10);
        assert_eq!(pool.checkout_timeout, Duration::from_secs(3));
        assert_eq!(pool.max_age, Duration::from_secs(60));

        let validator = config.validator_config();
        assert_eq!(validator.max_rows, 500);
        assert_eq!(validator.max_joins, 2);
        assert_eq!(validator.max_subqueries, DEFAULT_MAX_SUBQUERIES);

        assert_eq!(
            config.observability_config().slow_call_threshold,
            Duration::from_millis(20)
        );
        assert_eq!(config.query_timeout_duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_validate_rejects_zero_pool() {
        let config = Config {
            pool_size: 0,
            ..Config::for_database("x.db")
        };
        let err = config.validate().unwrap_err();
        assert!(err.contains("pool_size"));
    }

    #[test]
    fn test_validate_rejects_zero_row_cap() {
        let config = Config {
            max_rows: 0,
            ..Config::for_database("x.db")
        };
        assert!(config.validate().unwrap_err().contains("max_rows"));
    }

    #[test]
    fn test_validate_rejects_empty_database() {
        let config = Config::for_database("  ");
        assert!(config.validate().is_err());
    }
}
