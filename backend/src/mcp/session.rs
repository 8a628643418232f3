//! Session data access for long-lived connections.
//!
//! tower-sessions buffers changes and persists them when the response is
//! produced. An SSE response is produced as soon as the stream opens, so
//! changes made afterwards by tool handlers would never reach the store.
//! [`SessionAccess`] reads from a snapshot taken when the connection opened
//! and writes straight through to the store with [`Session::save`].

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tower_sessions::Session;
use tracing::debug;

/// Error type for session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(
        "session writes are unavailable: no session layer is installed for this endpoint \
         (add a tower_sessions::SessionManagerLayer to the router)"
    )]
    NotInstalled,

    #[error("failed to serialize session value '{name}': {source}")]
    Serialization {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("session store error: {0}")]
    Store(#[from] tower_sessions::session::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Session data scoped to one connection.
///
/// Cloning is cheap; all clones share the same snapshot and backing session.
#[derive(Clone)]
pub struct SessionAccess {
    inner: Arc<SessionAccessInner>,
}

struct SessionAccessInner {
    /// Backing session, `None` when no session layer is installed
    session: Option<Session>,
    /// Values loaded at connect time, updated by writes through this handle
    snapshot: RwLock<HashMap<String, Value>>,
    /// Keys loaded at connect time or written since
    tracked: RwLock<HashSet<String>>,
}

impl SessionAccess {
    /// Load the given keys from the session into a snapshot.
    pub async fn load(session: Option<Session>, keys: &[String]) -> Result<Self> {
        let mut snapshot = HashMap::new();
        if let Some(session) = &session {
            for key in keys {
                if let Some(value) = session.get_value(key).await? {
                    snapshot.insert(key.clone(), value);
                }
            }
            debug!(
                "Loaded {} of {} session values for session {:?}",
                snapshot.len(),
                keys.len(),
                session.id()
            );
        }

        Ok(Self {
            inner: Arc::new(SessionAccessInner {
                session,
                snapshot: RwLock::new(snapshot),
                tracked: RwLock::new(keys.iter().cloned().collect()),
            }),
        })
    }

    /// Session access with no backing session layer.
    ///
    /// Reads return `None`; writes fail with [`SessionError::NotInstalled`].
    pub fn detached() -> Self {
        Self {
            inner: Arc::new(SessionAccessInner {
                session: None,
                snapshot: RwLock::new(HashMap::new()),
                tracked: RwLock::new(HashSet::new()),
            }),
        }
    }

    /// Whether a session layer backs this handle.
    pub fn is_installed(&self) -> bool {
        self.inner.session.is_some()
    }

    /// Whether `name` was loaded at connect time or written since.
    ///
    /// Reads of untracked keys always return `None`.
    pub fn tracks(&self, name: &str) -> bool {
        self.inner.tracked.read().contains(name)
    }

    /// Read a value from the snapshot.
    ///
    /// Returns `None` if the value is absent or does not deserialize as `T`.
    pub fn read<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        if self.is_installed() && !self.tracks(name) {
            debug!(
                "Session key '{}' was not loaded for this connection; \
                 list it in the endpoint's session keys",
                name
            );
        }
        let snapshot = self.inner.snapshot.read();
        snapshot
            .get(name)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Write a value and persist it to the store before returning.
    pub async fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let session = self.backing()?;
        let value = serde_json::to_value(value).map_err(|source| SessionError::Serialization {
            name: name.to_string(),
            source,
        })?;

        session.insert_value(name, value.clone()).await?;
        session.save().await?;
        self.inner.snapshot.write().insert(name.to_string(), value);
        self.inner.tracked.write().insert(name.to_string());
        debug!("Persisted session value '{}'", name);
        Ok(())
    }

    /// Remove a value and persist the removal before returning.
    pub async fn clear(&self, name: &str) -> Result<()> {
        let session = self.backing()?;
        session.remove_value(name).await?;
        session.save().await?;
        self.inner.snapshot.write().remove(name);
        debug!("Cleared session value '{}'", name);
        Ok(())
    }

    fn backing(&self) -> Result<&Session> {
        self.inner
            .session
            .as_ref()
            .ok_or(SessionError::NotInstalled)
    }
}

impl std::fmt::Debug for SessionAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionAccess")
            .field("installed", &self.is_installed())
            .field("keys", &self.inner.snapshot.read().keys().collect::<Vec<_>>())
            .finish()
    }
}
