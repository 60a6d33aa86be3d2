//! Persistence for the resume token and last-known session id.
//!
//! [`ReconnectTokenStore`] abstracts an async key-value backend (secure
//! enclave, keychain, flat file, ...). The client only ever touches two
//! keys. [`TokenStorage`] wraps a store and enforces the failure policy:
//! every storage failure is caught and logged, never propagated — a broken
//! backend degrades to "no token available", it never breaks the connection
//! flow.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Result;

/// Storage key for the resume token.
pub const RECONNECT_TOKEN_KEY: &str = "karaoke_reconnectToken";

/// Storage key for the last-known session id.
pub const SESSION_ID_KEY: &str = "karaoke_sessionId";

// ── Trait ───────────────────────────────────────────────────────────

/// Abstract async key-value persistence.
///
/// Implement this for the host platform's storage (keychain, app data dir,
/// browser storage). Implementations should be cheap to call repeatedly;
/// the client reads at most once per resume attempt.
///
/// # Errors
///
/// Methods may fail with any [`KaraokeError`]; callers inside this crate go
/// through [`TokenStorage`], which logs and swallows all failures.
#[async_trait]
pub trait ReconnectTokenStore: Send + Sync {
    /// Fetch the value for `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

// ── In-memory implementation ────────────────────────────────────────

/// In-memory [`ReconnectTokenStore`] for tests, examples, and hosts without
/// platform storage. Tokens do not survive process restarts.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReconnectTokenStore for MemoryTokenStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

// ── Wrapper with swallowed failures ─────────────────────────────────

/// The client's view of token persistence.
///
/// All failures are logged via `tracing` and converted into harmless
/// defaults so callers never need to handle storage errors.
#[derive(Clone)]
pub struct TokenStorage {
    store: Arc<dyn ReconnectTokenStore>,
}

impl TokenStorage {
    pub fn new(store: Arc<dyn ReconnectTokenStore>) -> Self {
        Self { store }
    }

    /// Load the persisted resume token, if any.
    pub async fn load_reconnect_token(&self) -> Option<String> {
        match self.store.get(RECONNECT_TOKEN_KEY).await {
            Ok(token) => token,
            Err(e) => {
                warn!("failed to load reconnect token: {e}");
                None
            }
        }
    }

    /// Persist the resume token. Called after `welcome` and on rotation.
    pub async fn save_reconnect_token(&self, token: &str) {
        if let Err(e) = self.store.set(RECONNECT_TOKEN_KEY, token).await {
            warn!("failed to save reconnect token: {e}");
        }
    }

    /// Remove the persisted resume token. Called on logout, terminal error,
    /// or failed resume.
    pub async fn clear_reconnect_token(&self) {
        if let Err(e) = self.store.remove(RECONNECT_TOKEN_KEY).await {
            warn!("failed to clear reconnect token: {e}");
        }
    }

    /// Persist the last-known session id.
    pub async fn save_session_id(&self, session_id: &str) {
        if let Err(e) = self.store.set(SESSION_ID_KEY, session_id).await {
            warn!("failed to save session id: {e}");
        }
    }

    /// Load the last-known session id, if any.
    pub async fn load_session_id(&self) -> Option<String> {
        match self.store.get(SESSION_ID_KEY).await {
            Ok(id) => id,
            Err(e) => {
                warn!("failed to load session id: {e}");
                None
            }
        }
    }

    /// Remove both keys. Called on logout or session end.
    pub async fn clear_session_data(&self) {
        self.clear_reconnect_token().await;
        if let Err(e) = self.store.remove(SESSION_ID_KEY).await {
            warn!("failed to clear session id: {e}");
        }
    }
}

impl std::fmt::Debug for TokenStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStorage").finish_non_exhaustive()
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::error::KaraokeError;

    /// Store whose every operation fails, for exercising the swallow policy.
    struct BrokenStore;

    #[async_trait]
    impl ReconnectTokenStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(KaraokeError::Storage("backend offline".into()))
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(KaraokeError::Storage("backend offline".into()))
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            Err(KaraokeError::Storage("backend offline".into()))
        }
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let storage = TokenStorage::new(Arc::new(MemoryTokenStore::new()));

        assert!(storage.load_reconnect_token().await.is_none());

        storage.save_reconnect_token("abc123").await;
        assert_eq!(storage.load_reconnect_token().await.as_deref(), Some("abc123"));

        storage.clear_reconnect_token().await;
        assert!(storage.load_reconnect_token().await.is_none());
    }

    #[tokio::test]
    async fn session_id_round_trip() {
        let storage = TokenStorage::new(Arc::new(MemoryTokenStore::new()));

        storage.save_session_id("s1").await;
        assert_eq!(storage.load_session_id().await.as_deref(), Some("s1"));

        storage.clear_session_data().await;
        assert!(storage.load_session_id().await.is_none());
    }

    #[tokio::test]
    async fn clear_session_data_removes_both_keys() {
        let store = Arc::new(MemoryTokenStore::new());
        let storage = TokenStorage::new(store);

        storage.save_reconnect_token("tok").await;
        storage.save_session_id("s1").await;
        storage.clear_session_data().await;

        assert!(storage.load_reconnect_token().await.is_none());
        assert!(storage.load_session_id().await.is_none());
    }

    #[tokio::test]
    async fn broken_store_failures_are_swallowed() {
        let storage = TokenStorage::new(Arc::new(BrokenStore));

        // None of these may panic or propagate an error.
        assert!(storage.load_reconnect_token().await.is_none());
        assert!(storage.load_session_id().await.is_none());
        storage.save_reconnect_token("tok").await;
        storage.save_session_id("s1").await;
        storage.clear_reconnect_token().await;
        storage.clear_session_data().await;
    }
}
