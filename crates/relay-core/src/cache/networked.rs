//! Networked backend on top of Redis (or any RESP-compatible server).
//!
//! Values are stored as plain strings; expiry uses the server's per-key TTL
//! set at write time, so no local sweep runs.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info};

use super::{ConversationCache, TtlPolicy};
use crate::error::CacheResult;

const BACKEND: &str = "redis";

#[derive(Clone)]
pub struct RedisCache {
    client: redis::Client,
    key_prefix: Option<String>,
    policy: TtlPolicy,
}

impl RedisCache {
    /// Validate `url` and build a client. No connection is made until the
    /// first operation.
    pub fn open(url: &str, key_prefix: Option<String>, policy: TtlPolicy) -> CacheResult<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self { client, key_prefix, policy })
    }

    fn key(&self, conversation_id: &str) -> String {
        storage_key(self.key_prefix.as_deref(), conversation_id)
    }

    async fn connection(&self) -> CacheResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

fn storage_key(prefix: Option<&str>, conversation_id: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}:{conversation_id}"),
        None => conversation_id.to_owned(),
    }
}

/// Per-key expiry in milliseconds, or `None` when entries never expire.
fn expiry_millis(policy: TtlPolicy) -> Option<u64> {
    policy
        .expires()
        .then(|| u64::try_from(policy.ttl.as_millis()).unwrap_or(u64::MAX).max(1))
}

#[async_trait]
impl ConversationCache for RedisCache {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn initialize(&self) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(reply = %pong, ttl_secs = self.policy.ttl.as_secs(), "redis cache ready");
        Ok(())
    }

    async fn read(&self, conversation_id: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection().await?;
        let raw: Option<Vec<u8>> = conn.get(self.key(conversation_id)).await?;
        Ok(raw.and_then(|bytes| match String::from_utf8(bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(conversation_id, error = %e, "undecodable cache value");
                None
            }
        }))
    }

    async fn write(&self, conversation_id: &str, value: &str) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let key = self.key(conversation_id);
        match expiry_millis(self.policy) {
            Some(ms) => {
                let _: () = conn.pset_ex(key, value, ms).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn delete_if_expired(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(self.key(key)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn keys_are_optionally_prefixed() {
        assert_eq!(storage_key(None, "abc"), "abc");
        assert_eq!(storage_key(Some("relay"), "abc"), "relay:abc");
    }

    #[test]
    fn expiry_mirrors_policy() {
        assert_eq!(expiry_millis(TtlPolicy::never_expires()), None);
        assert_eq!(expiry_millis(TtlPolicy::from_secs(2, 0).unwrap()), Some(2000));
        let tiny = TtlPolicy { ttl: Duration::from_micros(10), sweep_interval: Duration::ZERO };
        assert_eq!(expiry_millis(tiny), Some(1));
    }

    #[test]
    fn rejects_malformed_url() {
        assert!(RedisCache::open("not a url", None, TtlPolicy::never_expires()).is_err());
    }

    /// Needs a live server: `REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn round_trip_against_live_server() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let prefix = format!("relay-test-{}", uuid::Uuid::new_v4());
        let cache = RedisCache::open(&url, Some(prefix), TtlPolicy::from_secs(1, 0).unwrap()).unwrap();
        cache.initialize().await.unwrap();

        cache.write("c1", "first").await.unwrap();
        cache.write("c1", "second").await.unwrap();
        assert_eq!(cache.read("c1").await.unwrap().as_deref(), Some("second"));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(cache.read("c1").await.unwrap(), None);

        cache.write("c2", "v").await.unwrap();
        cache.delete_if_expired("c2").await.unwrap();
        cache.delete_if_expired("c2").await.unwrap();
        assert_eq!(cache.read("c2").await.unwrap(), None);
    }
}
