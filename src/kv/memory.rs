//! In-process keyed store
//!
//! Keys expire lazily on access and eagerly from a sweeper task. Both paths
//! publish the expired key to every live subscriber, mirroring Redis
//! keyspace `expired` events.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{ExpiredKeys, KeyValueStore, KvError};

// ============================================================================
// Memory Store
// ============================================================================

/// In-process store with TTLs and expiry notifications
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    entries: Mutex<HashMap<String, Entry>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<String>>>,
}

struct Entry {
    value: String,
    expires_at: Instant,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the background sweeper
    ///
    /// The task ends on its own once every handle to the store is dropped.
    pub fn start_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let weak: Weak<MemoryStoreInner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let expired = inner.expire_due();
                if expired > 0 {
                    tracing::debug!(count = expired, "Memory store expired keys");
                }
            }
        })
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .entries
            .lock()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MemoryStoreInner {
    /// Remove every expired key and notify subscribers
    fn expire_due(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = {
            let mut entries = self.entries.lock();
            let keys: Vec<String> = entries
                .iter()
                .filter(|(_, e)| e.expires_at <= now)
                .map(|(k, _)| k.clone())
                .collect();
            for key in &keys {
                entries.remove(key);
            }
            keys
        };

        let count = expired.len();
        for key in expired {
            self.notify(key);
        }
        count
    }

    /// Drop `key` if its deadline passed
    fn expire_key(&self, key: &str) {
        let now = Instant::now();
        let removed = {
            let mut entries = self.entries.lock();
            match entries.get(key) {
                Some(entry) if entry.expires_at <= now => entries.remove(key).is_some(),
                _ => false,
            }
        };
        if removed {
            self.notify(key.to_string());
        }
    }

    fn notify(&self, key: String) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(key.clone()).is_ok());
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.inner.expire_key(key);
        Ok(self.inner.entries.lock().get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        self.inner.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn set_all(&self, pairs: &[(String, String)], ttl: Duration) -> Result<(), KvError> {
        let expires_at = Instant::now() + ttl;
        let mut entries = self.inner.entries.lock();
        for (key, value) in pairs {
            entries.insert(
                key.clone(),
                Entry {
                    value: value.clone(),
                    expires_at,
                },
            );
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<Option<String>, KvError> {
        self.inner.expire_key(key);
        Ok(self.inner.entries.lock().remove(key).map(|e| e.value))
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        self.inner.expire_key(key);
        Ok(self.inner.entries.lock().contains_key(key))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError> {
        self.inner.expire_key(key);
        let now = Instant::now();
        Ok(self
            .inner
            .entries
            .lock()
            .get(key)
            .map(|e| e.expires_at.saturating_duration_since(now)))
    }

    async fn subscribe_expired(&self) -> Result<ExpiredKeys, KvError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push(tx);

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|key| (key, rx))
        });
        Ok(stream.boxed())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store.set("a", "1", Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
        assert!(store.exists("a").await.unwrap());

        assert_eq!(store.delete("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.delete("a").await.unwrap(), None);
        assert!(!store.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_counts_down() {
        let store = MemoryStore::new();
        store.set("a", "1", Duration::from_secs(60)).await.unwrap();

        let ttl = store.ttl("a").await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(60));
        assert!(ttl > Duration::from_secs(59));
        assert_eq!(store.ttl("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sweeper_publishes_expired_keys() {
        let store = MemoryStore::new();
        let mut expired = store.subscribe_expired().await.unwrap();
        let _sweeper = store.start_sweeper(Duration::from_millis(10));

        store.set("short", "x", Duration::from_millis(30)).await.unwrap();
        store.set("long", "y", Duration::from_secs(60)).await.unwrap();

        let key = tokio::time::timeout(Duration::from_secs(2), expired.next())
            .await
            .unwrap();
        assert_eq!(key.as_deref(), Some("short"));
        assert!(store.exists("long").await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_explicit_delete_is_not_an_expiry() {
        let store = MemoryStore::new();
        let mut expired = store.subscribe_expired().await.unwrap();

        store.set("a", "1", Duration::from_secs(60)).await.unwrap();
        store.delete("a").await.unwrap();
        store.inner.expire_due();

        let next = tokio::time::timeout(Duration::from_millis(50), expired.next()).await;
        assert!(next.is_err());
    }
}
