//! Session storage contract.
//!
//! The store is an origin-scoped key-value map that survives reloads. It is the
//! only shared mutable resource of the session guard; writers are limited to
//! the remote validator (purge on 401), the guard (purge on local expiry) and
//! the auth client (write on login, purge on logout).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::user::UserSummary;

/// Opaque bearer string.
pub const TOKEN_KEY: &str = "token";
/// Serialized [`UserSummary`].
pub const USER_KEY: &str = "user";
/// Flag written by older recruai builds; removed on purge.
pub const LEGACY_AUTH_FLAG_KEY: &str = "isAuthenticated";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("failed to (de)serialize stored record: {0}")]
    Serialization(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Read the stored bearer token. Blank values count as absent.
pub async fn read_token(store: &dyn SessionStore) -> Result<Option<String>, StoreError> {
    Ok(store
        .get(TOKEN_KEY)
        .await?
        .filter(|token| !token.trim().is_empty()))
}

pub async fn read_user(store: &dyn SessionStore) -> Result<Option<UserSummary>, StoreError> {
    match store.get(USER_KEY).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Serialization(e.to_string())),
        None => Ok(None),
    }
}

/// Persist a freshly issued session.
pub async fn save_session(
    store: &dyn SessionStore,
    token: &str,
    user: Option<&UserSummary>,
) -> Result<(), StoreError> {
    store.set(TOKEN_KEY, token).await?;
    match user {
        Some(user) => {
            let raw =
                serde_json::to_string(user).map_err(|e| StoreError::Serialization(e.to_string()))?;
            store.set(USER_KEY, &raw).await
        }
        None => store.remove(USER_KEY).await,
    }
}

/// Remove the token and its identity record.
pub async fn purge_session(store: &dyn SessionStore) -> Result<(), StoreError> {
    store.remove(TOKEN_KEY).await?;
    store.remove(USER_KEY).await?;
    store.remove(LEGACY_AUTH_FLAG_KEY).await
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    removals: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with a token (and no user record).
    pub fn with_token(token: impl Into<String>) -> Self {
        let mut entries = HashMap::new();
        entries.insert(TOKEN_KEY.to_string(), token.into());
        Self {
            entries: RwLock::new(entries),
            removals: AtomicUsize::new(0),
        }
    }

    /// Number of `remove` calls observed so far.
    pub fn removals(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.removals.fetch_add(1, Ordering::SeqCst);
        self.entries.write().await.remove(key);
        Ok(())
    }
}
