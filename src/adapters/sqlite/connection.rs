//! Opening SQLite pools for the plan store.
//!
//! File databases run in WAL mode with foreign keys on. Executions write
//! from several tasks at once, so writers wait on the busy timeout instead
//! of failing with `SQLITE_BUSY`.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::domain::models::DatabaseConfig;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

/// Failure to open the plan store.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The directory that should hold the database file could not be created.
    #[error("Failed to create database directory {path}: {source}")]
    Directory {
        /// Directory that was being created.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },

    /// SQLite refused the first connection.
    #[error("Failed to open database {path}: {source}")]
    Open {
        /// Database file, or `:memory:`.
        path: PathBuf,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },
}

/// Open a pool on the database file named by `config.path`, creating the
/// file and its parent directory when missing.
pub async fn open_pool(config: &DatabaseConfig) -> Result<SqlitePool, ConnectionError> {
    let path = Path::new(&config.path);
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConnectionError::Directory {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await
        .map_err(|source| ConnectionError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// In-memory pool pinned to a single connection, so the database lives as
/// long as the pool does.
pub async fn open_memory_pool() -> Result<SqlitePool, ConnectionError> {
    let options = SqliteConnectOptions::new()
        .filename(":memory:")
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(|source| ConnectionError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })
}
