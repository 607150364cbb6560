//! Keyed store for session records
//!
//! A small string key/value interface with per-key TTLs and a notification
//! stream for keys the store expires on its own. Two backends:
//! - `MemoryStore`: in-process map with a sweeper task (single node, tests)
//! - `RedisStore`: Redis commands plus keyspace `expired` events

mod memory;
mod redis_store;

use std::time::Duration;

use futures::stream::BoxStream;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Stream of keys the store expired without an explicit delete
pub type ExpiredKeys = BoxStream<'static, String>;

/// Keyed store errors
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Store setup timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store command failed: {0}")]
    Command(String),

    #[error("Expiry subscription failed: {0}")]
    Subscription(String),

    #[error("Stored record is corrupt: {0}")]
    Corrupt(String),
}

/// Keyed store backend
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Store `value` under `key`, expiring after `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// Store several entries in one atomic step, all sharing `ttl`
    async fn set_all(&self, entries: &[(String, String)], ttl: Duration) -> Result<(), KvError>;

    /// Remove `key`, returning the value it held
    async fn delete(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Check whether `key` is present
    async fn exists(&self, key: &str) -> Result<bool, KvError>;

    /// Remaining time to live. `None` when the key is absent or never expires.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError>;

    /// Subscribe to keys expired by the store itself
    ///
    /// Dropping the returned stream ends the subscription.
    async fn subscribe_expired(&self) -> Result<ExpiredKeys, KvError>;
}
