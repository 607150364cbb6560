//! Session Registry
//!
//! Pure data access for session records in the keyed store:
//! - JSON records under `session:<id>`
//! - read-modify-write updates serialized per session id
//! - TTL fixed at creation; updates re-apply what is left of it

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use super::types::UploadSession;
use crate::kv::{KeyValueStore, KvError};

pub const SESSION_KEY_PREFIX: &str = "session:";

/// Store key for a session record
pub fn session_key(id: Uuid) -> String {
    format!("{}{}", SESSION_KEY_PREFIX, id)
}

/// Session id encoded in a store key, if it is a session key
pub fn session_id_from_key(key: &str) -> Option<Uuid> {
    key.strip_prefix(SESSION_KEY_PREFIX)
        .and_then(|id| Uuid::parse_str(id).ok())
}

// ============================================================================
// Per-Key Locks
// ============================================================================

/// Async mutex per store key
///
/// Entries are dropped once no task holds or waits on them.
#[derive(Default)]
pub(crate) struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

pub(crate) struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    pub(crate) async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let mutex = {
            let mut locks = self.locks.lock();
            locks.entry(key.to_string()).or_default().clone()
        };

        KeyGuard {
            locks: self,
            key: key.to_string(),
            guard: Some(mutex.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.locks.lock();
        if locks
            .get(&self.key)
            .is_some_and(|m| Arc::strong_count(m) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

// ============================================================================
// Session Registry
// ============================================================================

/// Keyed, TTL-bearing store of session records
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<SessionRegistryInner>,
}

struct SessionRegistryInner {
    store: Arc<dyn KeyValueStore>,
    locks: KeyLocks,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            inner: Arc::new(SessionRegistryInner {
                store,
                locks: KeyLocks::default(),
            }),
        }
    }

    /// Underlying keyed store
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.inner.store
    }

    pub(crate) fn locks(&self) -> &KeyLocks {
        &self.inner.locks
    }

    /// Persist a new session together with `companions`
    ///
    /// All entries are written in one store operation and share the
    /// session's TTL.
    pub async fn create(
        &self,
        session: &UploadSession,
        companions: &[(String, String)],
    ) -> Result<(), KvError> {
        let ttl = session
            .remaining_ttl()
            .ok_or_else(|| KvError::Command(format!("session {} created already expired", session.id)))?;

        let mut entries = Vec::with_capacity(companions.len() + 1);
        entries.push((session_key(session.id), encode(session)?));
        entries.extend_from_slice(companions);

        self.inner.store.set_all(&entries, ttl).await
    }

    /// Get a session by ID
    pub async fn get(&self, id: Uuid) -> Result<Option<UploadSession>, KvError> {
        match self.inner.store.get(&session_key(id)).await? {
            Some(raw) => decode(&raw).map(Some),
            None => Ok(None),
        }
    }

    /// Check whether a session record is present
    pub async fn exists(&self, id: Uuid) -> Result<bool, KvError> {
        self.inner.store.exists(&session_key(id)).await
    }

    /// Read-modify-write a session
    ///
    /// Serialized against every other update/delete of the same id. Returns
    /// `None` without writing when the record is gone or past its expiry.
    pub async fn update<T>(
        &self,
        id: Uuid,
        mutate: impl FnOnce(&mut UploadSession) -> T,
    ) -> Result<Option<(UploadSession, T)>, KvError> {
        let key = session_key(id);
        let _guard = self.inner.locks.lock(&key).await;

        let Some(raw) = self.inner.store.get(&key).await? else {
            return Ok(None);
        };
        let mut session = decode(&raw)?;

        let remaining = match (session.remaining_ttl(), self.inner.store.ttl(&key).await?) {
            (Some(record), Some(store)) => record.min(store),
            (Some(record), None) => record,
            (None, _) => return Ok(None),
        };

        let out = mutate(&mut session);
        self.inner
            .store
            .set(&key, &encode(&session)?, remaining)
            .await?;

        Ok(Some((session, out)))
    }

    /// Delete a session, returning the record it held
    pub async fn delete(&self, id: Uuid) -> Result<Option<UploadSession>, KvError> {
        let key = session_key(id);
        let _guard = self.inner.locks.lock(&key).await;

        match self.inner.store.delete(&key).await? {
            Some(raw) => match decode(&raw) {
                Ok(session) => Ok(Some(session)),
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "Deleted corrupt session record");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }
}

fn encode(session: &UploadSession) -> Result<String, KvError> {
    serde_json::to_string(session).map_err(|e| KvError::Corrupt(e.to_string()))
}

fn decode(raw: &str) -> Result<UploadSession, KvError> {
    serde_json::from_str(raw).map_err(|e| KvError::Corrupt(e.to_string()))
}

// ============================================================================
// Tests
// ============================================================================
