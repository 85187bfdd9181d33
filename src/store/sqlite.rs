//! SQLite breakpoint store

use super::{Breakpoint, BreakpointStore};
use crate::error::{Error, Result};
use crate::types::TaskId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use sqlx::{FromRow, SqliteConnection};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Breakpoints stored in a SQLite database
#[derive(Clone, Debug)]
pub struct SqliteBreakpointStore {
    pool: SqlitePool,
}

#[derive(FromRow)]
struct BreakpointRow {
    id: i64,
    url: String,
    path: String,
    filename: Option<String>,
    etag: Option<String>,
    so_far_bytes: i64,
    total_bytes: i64,
    resumable: bool,
    updated_at: i64,
}

impl From<BreakpointRow> for Breakpoint {
    fn from(row: BreakpointRow) -> Self {
        Self {
            // Ids are u64 stored bit-for-bit in a signed column
            id: TaskId(row.id as u64),
            url: row.url,
            path: PathBuf::from(row.path),
            filename: row.filename,
            etag: row.etag,
            so_far_bytes: row.so_far_bytes.max(0) as u64,
            total_bytes: row.total_bytes.max(0) as u64,
            resumable: row.resumable,
            updated_at: DateTime::from_timestamp(row.updated_at, 0).unwrap_or_default(),
        }
    }
}

impl SqliteBreakpointStore {
    /// Open (or create) the database at `path` and apply migrations
    pub async fn new(path: &Path) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Storage(format!("Failed to create database directory: {}", e))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.run_migrations().await?;

        tracing::debug!(path = %path.display(), "breakpoint database ready");
        Ok(store)
    }

    /// Store backed by a private in-memory database
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // A single connection: every new in-memory connection is a new database
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::Storage(format!("Failed to create schema_version table: {}", e)))?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| Error::Storage(format!("Failed to query schema version: {}", e)))?;

        if current_version.unwrap_or(0) < 1 {
            Self::migrate_v1(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: breakpoints table
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying breakpoint database migration v1");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS breakpoints (
                id INTEGER PRIMARY KEY,
                url TEXT NOT NULL,
                path TEXT NOT NULL,
                filename TEXT,
                etag TEXT,
                so_far_bytes INTEGER NOT NULL,
                total_bytes INTEGER NOT NULL,
                resumable INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::Storage(format!("Failed to create breakpoints table: {}", e)))?;

        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (1, ?)")
            .bind(Utc::now().timestamp())
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::Storage(format!("Failed to record migration v1: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl BreakpointStore for SqliteBreakpointStore {
    async fn load(&self, id: TaskId) -> Result<Option<Breakpoint>> {
        let row = sqlx::query_as::<_, BreakpointRow>(
            r#"
            SELECT id, url, path, filename, etag, so_far_bytes, total_bytes, resumable, updated_at
            FROM breakpoints
            WHERE id = ?
            "#,
        )
        .bind(id.0 as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Storage(format!("Failed to load breakpoint: {}", e)))?;

        Ok(row.map(Breakpoint::from))
    }

    async fn save(&self, breakpoint: &Breakpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO breakpoints (
                id, url, path, filename, etag, so_far_bytes, total_bytes, resumable, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                path = excluded.path,
                filename = excluded.filename,
                etag = excluded.etag,
                so_far_bytes = excluded.so_far_bytes,
                total_bytes = excluded.total_bytes,
                resumable = excluded.resumable,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(breakpoint.id.0 as i64)
        .bind(&breakpoint.url)
        .bind(breakpoint.path.to_string_lossy().into_owned())
        .bind(&breakpoint.filename)
        .bind(&breakpoint.etag)
        .bind(i64::try_from(breakpoint.so_far_bytes).unwrap_or(i64::MAX))
        .bind(i64::try_from(breakpoint.total_bytes).unwrap_or(i64::MAX))
        .bind(breakpoint.resumable)
        .bind(breakpoint.updated_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(format!("Failed to save breakpoint: {}", e)))?;

        Ok(())
    }

    async fn remove(&self, id: TaskId) -> Result<()> {
        sqlx::query("DELETE FROM breakpoints WHERE id = ?")
            .bind(id.0 as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to remove breakpoint: {}", e)))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
