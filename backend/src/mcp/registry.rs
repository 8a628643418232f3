//! Connection registry.
//!
//! Maps session IDs to live SSE transports. The SSE handler inserts an entry
//! when a stream opens; the message handler looks transports up by the
//! `sessionId` query parameter. Entries are removed through a
//! [`RegistrationGuard`], so removal also happens when a connection task is
//! aborted.

use super::transport::SseTransport;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Registry of live transports keyed by session ID.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<SseTransport>>>>,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport under its session ID.
    ///
    /// Session IDs are minted per connection, so any existing entry with the
    /// same ID is stale and gets replaced.
    pub fn put(&self, transport: Arc<SseTransport>) {
        let id = transport.session_id().to_string();
        let previous = self.inner.write().insert(id.clone(), transport);
        if previous.is_some() {
            debug!("Replaced stale transport for session {}", id);
        }
        info!("Registered SSE transport: {}", id);
    }

    /// Look up the transport for a session ID.
    pub fn get(&self, session_id: &str) -> Option<Arc<SseTransport>> {
        self.inner.read().get(session_id).cloned()
    }

    /// Remove a transport. Returns `true` if an entry was removed.
    pub fn remove(&self, session_id: &str) -> bool {
        let removed = self.inner.write().remove(session_id).is_some();
        if removed {
            info!("Unregistered SSE transport: {}", session_id);
        }
        removed
    }

    /// Check if a session ID is registered.
    pub fn contains(&self, session_id: &str) -> bool {
        self.inner.read().contains_key(session_id)
    }

    /// Number of live transports.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// IDs of all live transports.
    pub fn session_ids(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    /// Register a transport and return a guard that unregisters it on drop.
    pub fn register(&self, transport: Arc<SseTransport>) -> RegistrationGuard {
        let session_id = transport.session_id().to_string();
        self.put(transport);
        RegistrationGuard {
            registry: self.clone(),
            session_id,
        }
    }
}

/// Removes a session's registry entry when dropped.
#[derive(Debug)]
pub struct RegistrationGuard {
    registry: ConnectionRegistry,
    session_id: String,
}

impl RegistrationGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio_util::sync::CancellationToken;

    fn transport(id: &str) -> Arc<SseTransport> {
        let (transport, _channels) =
            SseTransport::new(id.to_string(), 8, CancellationToken::new());
        Arc::new(transport)
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let registry = ConnectionRegistry::new();
        assert!(registry.get("missing").is_none());
        assert!(!registry.remove("missing"));
    }

    #[test]
    fn test_put_get_remove() {
        let registry = ConnectionRegistry::new();
        registry.put(transport("a"));

        assert_eq!(registry.get("a").unwrap().session_id(), "a");
        assert!(registry.remove("a"));
        assert!(registry.get("a").is_none());
        assert!(!registry.remove("a"));
    }

    #[test]
    fn test_put_replaces_stale_entry() {
        let registry = ConnectionRegistry::new();
        let first = transport("a");
        let second = transport("a");
        registry.put(first.clone());
        registry.put(second.clone());

        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.get("a").unwrap(), &second));
    }

    #[test]
    fn test_guard_removes_once() {
        let registry = ConnectionRegistry::new();
        let guard = registry.register(transport("a"));
        assert!(registry.contains("a"));

        // A racing explicit removal leaves nothing for the guard to do
        assert!(registry.remove(guard.session_id()));
        drop(guard);
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_and_remove() {
        let registry = ConnectionRegistry::new();
        let mut tasks = Vec::new();

        // 8 tasks, each registering 50 ids and closing every even one
        for task in 0..8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let mut open = Vec::new();
                for n in 0..50 {
                    let id = format!("{}-{}", task, n);
                    registry.put(transport(&id));
                    tokio::task::yield_now().await;
                    if n % 2 == 0 {
                        registry.remove(&id);
                    } else {
                        open.push(id);
                    }
                }
                open
            }));
        }

        let mut expected = HashSet::new();
        for task in tasks {
            expected.extend(task.await.unwrap());
        }

        let actual: HashSet<String> = registry.session_ids().into_iter().collect();
        assert_eq!(actual, expected);
        assert_eq!(registry.len(), 8 * 25);
    }
}
