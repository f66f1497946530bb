//! Upload history store
//!
//! Append-only log of completed relays, persisted in SQLite. Records are
//! never updated or deleted.
//!
//! The table layout matches databases written by earlier deployments:
//!
//! ```sql
//! CREATE TABLE files (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     filename TEXT NOT NULL,
//!     url TEXT NOT NULL,
//!     created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
//! )
//! ```

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    url TEXT NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)
"#;

/// History store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(&'static str),
}

/// One completed relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct UploadRecord {
    /// Ordering key, never exposed to callers
    #[serde(skip)]
    pub id: i64,
    pub filename: String,
    /// Canonical root-relative path, or a full URL for legacy rows
    pub url: String,
    pub created_at: NaiveDateTime,
}

/// Durable upload history
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persist a record and return it with its id and timestamp assigned
    async fn append(&self, filename: &str, url: &str) -> Result<UploadRecord, StoreError>;

    /// All records, most recent first
    async fn list_all(&self) -> Result<Vec<UploadRecord>, StoreError>;
}

/// SQLite-backed history store
#[derive(Clone)]
pub struct SqliteHistory {
    pool: Pool<Sqlite>,
}

impl SqliteHistory {
    /// Open (creating if missing) the database at `path` and ensure the schema
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> Result<Self, StoreError> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            // Concurrent relays queue on the write lock instead of failing.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::info!(path = %path.display(), "History store ready");
        Ok(store)
    }

    /// Open a private in-memory database
    pub async fn in_memory() -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new().in_memory(true);
        // Every connection would get its own memory database, so keep one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create the schema if it does not exist yet
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check database connectivity
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the pool, waiting for in-flight queries
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl HistoryStore for SqliteHistory {
    #[tracing::instrument(name = "history.append", skip(self), err)]
    async fn append(&self, filename: &str, url: &str) -> Result<UploadRecord, StoreError> {
        if filename.is_empty() {
            return Err(StoreError::InvalidRecord("filename is empty"));
        }
        if url.is_empty() {
            return Err(StoreError::InvalidRecord("url is empty"));
        }

        let record = sqlx::query_as::<_, UploadRecord>(
            "INSERT INTO files (filename, url) VALUES (?, ?) \
             RETURNING id, filename, url, created_at",
        )
        .bind(filename)
        .bind(url)
        .fetch_one(&self.pool)
        .await?;

        crate::metrics::record_history_append();
        tracing::debug!(id = record.id, "History record written");

        Ok(record)
    }

    #[tracing::instrument(name = "history.list_all", skip(self), err)]
    async fn list_all(&self) -> Result<Vec<UploadRecord>, StoreError> {
        let rows = sqlx::query_as::<_, UploadRecord>(
            "SELECT id, filename, url, created_at FROM files ORDER BY id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
