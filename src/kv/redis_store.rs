//! Redis keyed store
//!
//! Commands go through a multiplexed `ConnectionManager`; expiry events come
//! from a dedicated pub/sub connection subscribed to
//! `__keyevent@<db>__:expired`.

use std::time::Duration;

use futures::StreamExt;
use redis::aio::ConnectionManager;

use super::{ExpiredKeys, KeyValueStore, KvError};

impl From<redis::RedisError> for KvError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_refusal() || e.is_connection_dropped() {
            KvError::Connection(e.to_string())
        } else {
            KvError::Command(e.to_string())
        }
    }
}

/// Redis-backed store
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
    db: i64,
}

impl RedisStore {
    /// Connect and verify the server answers PING within `timeout`
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, KvError> {
        let client =
            redis::Client::open(url).map_err(|e| KvError::Connection(e.to_string()))?;
        let db = client.get_connection_info().redis.db;

        let setup = async {
            let mut conn = ConnectionManager::new(client.clone()).await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>(conn)
        };

        let mut conn = tokio::time::timeout(timeout, setup)
            .await
            .map_err(|_| KvError::Timeout(timeout))??;

        // Expired events are off by default; managed servers may refuse this.
        let enabled: Result<(), redis::RedisError> = redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg("Ex")
            .query_async(&mut conn)
            .await;
        if let Err(e) = enabled {
            tracing::warn!(
                error = %e,
                "Could not enable keyspace expiry events; make sure notify-keyspace-events includes Ex"
            );
        }

        tracing::info!(db = db, "Connected to Redis session store");

        Ok(Self { client, conn, db })
    }

    fn expired_channel(&self) -> String {
        format!("__keyevent@{}__:expired", self.db)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait::async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn.clone();
        Ok(redis::cmd("GET").arg(key).query_async(&mut conn).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_all(&self, entries: &[(String, String)], ttl: Duration) -> Result<(), KvError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            pipe.cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ttl_millis(ttl))
                .ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn.clone();
        Ok(redis::cmd("GETDEL").arg(key).query_async(&mut conn).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.conn.clone();
        let count: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(count == 1)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError> {
        let mut conn = self.conn.clone();
        // -2: missing, -1: no expiry
        let millis: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok((millis >= 0).then(|| Duration::from_millis(millis as u64)))
    }

    async fn subscribe_expired(&self) -> Result<ExpiredKeys, KvError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| KvError::Subscription(e.to_string()))?;

        let channel = self.expired_channel();
        pubsub
            .psubscribe(&channel)
            .await
            .map_err(|e| KvError::Subscription(e.to_string()))?;

        tracing::info!(channel = %channel, "Subscribed to keyspace expiry events");

        let keys = pubsub
            .into_on_message()
            .filter_map(|msg| futures::future::ready(msg.get_payload::<String>().ok()));
        Ok(keys.boxed())
    }
}
