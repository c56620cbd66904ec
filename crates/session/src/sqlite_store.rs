//! Durable session storage in SQLite.
//!
//! Records are scoped by origin (the API base the token was issued for), so
//! several front ends can share one database file without seeing each other's
//! sessions.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::store::{SessionStore, StoreError};

/// SQLite-backed [`SessionStore`].
///
/// Cheap to clone; the pool is opened lazily on first use.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    origin: String,
    location: Location,
    pool: Arc<Mutex<Option<SqlitePool>>>,
}

#[derive(Debug, Clone)]
enum Location {
    /// `{data_dir}/cvai/session.db`.
    Default,
    Url(String),
}

impl SqliteStore {
    /// Store in the per-user application data directory.
    pub fn new(origin: impl Into<String>) -> Self {
        Self::with_location(origin, Location::Default)
    }

    /// Store at an explicit SQLite URL (e.g. `sqlite::memory:`).
    pub fn with_url(origin: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_location(origin, Location::Url(url.into()))
    }

    fn with_location(origin: impl Into<String>, location: Location) -> Self {
        Self {
            origin: origin.into(),
            location,
            pool: Arc::new(Mutex::new(None)),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Initialize the database connection (called lazily on first use).
    async fn pool(&self) -> anyhow::Result<SqlitePool> {
        let mut pool_guard = self.pool.lock().await;
        if let Some(pool) = pool_guard.as_ref() {
            return Ok(pool.clone());
        }

        let url = match &self.location {
            Location::Url(url) => url.clone(),
            Location::Default => {
                let path = session_db_path().context(
                    "failed to determine session DB path - ensure app data directory is accessible",
                )?;
                format!("sqlite://{}", path.to_string_lossy())
            }
        };

        let options = SqliteConnectOptions::from_str(&url)
            .with_context(|| format!("invalid SQLite URL {url:?}"))?
            .create_if_missing(true);

        // One connection: in-memory databases are per-connection, and session
        // traffic is a handful of reads per probe.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open session store at {url:?}"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_entries (
                origin     TEXT NOT NULL,
                key        TEXT NOT NULL,
                value      TEXT NOT NULL,
                PRIMARY KEY (origin, key)
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create session_entries table")?;

        *pool_guard = Some(pool.clone());
        Ok(pool)
    }

    /// Remove every record for this origin.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let pool = self.pool().await.map_err(backend)?;
        sqlx::query("DELETE FROM session_entries WHERE origin = ?1")
            .bind(&self.origin)
            .execute(&pool)
            .await
            .context("failed to clear session entries")
            .map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let pool = self.pool().await.map_err(backend)?;
        let row = sqlx::query(
            r#"
            SELECT value
            FROM session_entries
            WHERE origin = ?1
              AND key = ?2
            "#,
        )
        .bind(&self.origin)
        .bind(key)
        .fetch_optional(&pool)
        .await
        .with_context(|| format!("failed to read session entry {key:?}"))
        .map_err(backend)?;

        match row {
            Some(row) => row
                .try_get::<String, _>("value")
                .map(Some)
                .map_err(|e| StoreError::Backend(e.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let pool = self.pool().await.map_err(backend)?;
        sqlx::query(
            r#"
            INSERT INTO session_entries (origin, key, value)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(origin, key)
            DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(&self.origin)
        .bind(key)
        .bind(value)
        .execute(&pool)
        .await
        .with_context(|| format!("failed to write session entry {key:?}"))
        .map_err(backend)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let pool = self.pool().await.map_err(backend)?;
        sqlx::query("DELETE FROM session_entries WHERE origin = ?1 AND key = ?2")
            .bind(&self.origin)
            .bind(key)
            .execute(&pool)
            .await
            .with_context(|| format!("failed to remove session entry {key:?}"))
            .map_err(backend)?;
        Ok(())
    }
}

fn backend(err: anyhow::Error) -> StoreError {
    StoreError::Backend(format!("{err:#}"))
}

/// Resolve the path to the session database:
/// `{app_data_dir}/cvai/session.db`.
fn session_db_path() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share")?;

    let mut dir = base;
    dir.push("cvai");

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create session directory at {:?}", dir))?;

    dir.push("session.db");

    Ok(dir)
}
