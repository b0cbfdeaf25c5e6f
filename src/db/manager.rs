//! Connection managers for the pool.
//!
//! The pool itself knows nothing about SQLite. It asks a [`ManageConnection`]
//! implementation to open new handles and to health-check idle ones before
//! they are handed out again.

use crate::error::{DbError, DbResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Executor};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// How long SQLite waits on a locked database before returning `SQLITE_BUSY`.
const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens and validates native datastore connections on behalf of the pool.
pub trait ManageConnection: Send + Sync + 'static {
    /// The native connection handle.
    type Connection: Send + 'static;

    /// Open a new connection.
    fn connect(&self) -> impl Future<Output = DbResult<Self::Connection>> + Send;

    /// Cheap liveness check (`SELECT 1` or equivalent) run before an idle
    /// connection is reused.
    fn is_valid(&self, conn: &mut Self::Connection) -> impl Future<Output = DbResult<()>> + Send;
}

/// Opens connections to a single SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteConnectionManager {
    options: SqliteConnectOptions,
    writable: bool,
}

impl SqliteConnectionManager {
    /// Create a manager for `database`, either a plain file path or a `sqlite:` URL.
    ///
    /// Read-only managers open the file with `SQLITE_OPEN_READONLY` and never
    /// create it; writable managers create the file if it is missing.
    pub fn new(database: &str, writable: bool) -> DbResult<Self> {
        let options = if database.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(database).map_err(|e| {
                DbError::connection(
                    format!("Invalid SQLite connection string: {}", e),
                    "Check the connection URL format: sqlite:path/to/db.sqlite",
                )
            })?
        } else {
            SqliteConnectOptions::new().filename(database)
        };

        let options = options
            .read_only(!writable)
            .create_if_missing(writable)
            .busy_timeout(SQLITE_BUSY_TIMEOUT);

        Ok(Self { options, writable })
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

impl ManageConnection for SqliteConnectionManager {
    type Connection = SqliteConnection;

    async fn connect(&self) -> DbResult<SqliteConnection> {
        debug!(writable = self.writable, "Opening SQLite connection");
        self.options.connect().await.map_err(|e| {
            DbError::connection(
                format!("Failed to open database: {}", e),
                connection_suggestion(&e, self.writable),
            )
        })
    }

    async fn is_valid(&self, conn: &mut SqliteConnection) -> DbResult<()> {
        conn.execute("SELECT 1").await?;
        Ok(())
    }
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(error: &sqlx::Error, writable: bool) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("unable to open") && !writable {
        return "The file must exist for read-only access; pass --writable to create it"
            .to_string();
    }

    if error_str.contains("not a database") {
        return "Check that the file is a SQLite database".to_string();
    }

    "Verify the file path exists and is accessible: sqlite:path/to/db.sqlite".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_accepts_plain_path_and_url() {
        assert!(SqliteConnectionManager::new("/tmp/data.db", false).is_ok());
        assert!(SqliteConnectionManager::new("sqlite:/tmp/data.db", false).is_ok());
        assert!(SqliteConnectionManager::new("sqlite::memory:", true).is_ok());
    }

    #[tokio::test]
    async fn test_writable_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("new.db");
        let manager = SqliteConnectionManager::new(path.to_str().unwrap(), true).unwrap();

        let mut conn = manager.connect().await.unwrap();
        manager.is_valid(&mut conn).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_read_only_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.db");
        let manager = SqliteConnectionManager::new(path.to_str().unwrap(), false).unwrap();

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, DbError::Connection { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_read_only_connection_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ro.db");
        let path = path.to_str().unwrap();

        let writer = SqliteConnectionManager::new(path, true).unwrap();
        let mut conn = writer.connect().await.unwrap();
        conn.execute("CREATE TABLE t (id INTEGER)").await.unwrap();

        let reader = SqliteConnectionManager::new(path, false).unwrap();
        let mut conn = reader.connect().await.unwrap();
        assert!(conn.execute("INSERT INTO t VALUES (1)").await.is_err());
        reader.is_valid(&mut conn).await.unwrap();
    }
}
