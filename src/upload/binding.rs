//! Identity Binding Index
//!
//! Maps a client fingerprint to the session it last opened, so a client that
//! starts over evicts its abandoned upload. Bindings live in the same store
//! as session records, are written together with them, and expire with them.

use uuid::Uuid;

use super::registry::{KeyGuard, SessionRegistry};
use super::types::ClientFingerprint;
use crate::kv::KvError;

pub const BINDING_KEY_PREFIX: &str = "binding:";

/// Store key for a fingerprint binding
pub fn binding_key(fingerprint: &ClientFingerprint) -> String {
    format!("{}{}", BINDING_KEY_PREFIX, fingerprint)
}

/// `fingerprint -> session id` index
#[derive(Clone)]
pub struct IdentityBindings {
    registry: SessionRegistry,
}

impl IdentityBindings {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    /// Store entry to write alongside a new session record
    pub fn entry(&self, fingerprint: &ClientFingerprint, session_id: Uuid) -> (String, String) {
        (binding_key(fingerprint), session_id.to_string())
    }

    /// Session currently bound to `fingerprint`
    pub async fn lookup(&self, fingerprint: &ClientFingerprint) -> Result<Option<Uuid>, KvError> {
        let raw = self.registry.store().get(&binding_key(fingerprint)).await?;
        Ok(raw.and_then(|id| Uuid::parse_str(&id).ok()))
    }

    /// Exclusive hold on the binding for `fingerprint`
    ///
    /// Opening a session for a client runs entirely under this guard, so a
    /// client never ends up with two live sessions.
    pub(crate) async fn hold(&self, fingerprint: &ClientFingerprint) -> KeyGuard<'_> {
        self.registry.locks().lock(&binding_key(fingerprint)).await
    }

    /// Remove and return the binding for `fingerprint`
    pub async fn take(&self, fingerprint: &ClientFingerprint) -> Result<Option<Uuid>, KvError> {
        let guard = self.hold(fingerprint).await;
        self.take_held(fingerprint, &guard).await
    }

    /// [`IdentityBindings::take`] for a caller already holding the binding
    pub(crate) async fn take_held(
        &self,
        fingerprint: &ClientFingerprint,
        _held: &KeyGuard<'_>,
    ) -> Result<Option<Uuid>, KvError> {
        let key = binding_key(fingerprint);
        let raw = self.registry.store().delete(&key).await?;
        Ok(raw.and_then(|id| match Uuid::parse_str(&id) {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(binding = %key, value = %id, "Dropped malformed identity binding");
                None
            }
        }))
    }

    /// Remove the binding for `fingerprint` if it still points at `session_id`
    ///
    /// A newer session from the same client keeps its binding.
    pub async fn release(
        &self,
        fingerprint: &ClientFingerprint,
        session_id: Uuid,
    ) -> Result<bool, KvError> {
        let key = binding_key(fingerprint);
        let _guard = self.registry.locks().lock(&key).await;

        let store = self.registry.store();
        match store.get(&key).await? {
            Some(bound) if bound == session_id.to_string() => {
                store.delete(&key).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
