//! Time-bound conversation cache.
//!
//! [`ConversationCache`] maps a conversation identifier to a single string
//! value (a fingerprint or a reply payload). Three implementations share the
//! contract and are selected at runtime through [`CacheBackend`]:
//!
//! - [`embedded::RedbCache`] – durable embedded store; every operation is one
//!   transaction and a background sweep evicts entries older than the TTL.
//! - [`networked::RedisCache`] – networked store; expiry is delegated to the
//!   server's per-key TTL.
//! - [`memory::MemoryCache`] – in-process map with the same sweep semantics,
//!   mainly for tests.
//!
//! Writes are last-write-wins. `stored_at` is always stamped by the cache.

pub mod embedded;
pub mod memory;
pub mod networked;
mod sweeper;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

pub use self::embedded::RedbCache;
pub use self::memory::MemoryCache;
pub use self::networked::RedisCache;

/// Storage contract shared by every cache backend.
#[async_trait]
pub trait ConversationCache: Send + Sync + 'static {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Prepare the namespace and start background eviction where the
    /// backend has one. Call once before serving traffic.
    async fn initialize(&self) -> CacheResult<()>;

    /// Value stored for `conversation_id`, or `None` when absent or
    /// undecodable.
    async fn read(&self, conversation_id: &str) -> CacheResult<Option<String>>;

    /// Store `value`, replacing any previous entry.
    async fn write(&self, conversation_id: &str, value: &str) -> CacheResult<()>;

    /// Remove the entry under `key`. Succeeds when it is already gone.
    async fn delete_if_expired(&self, key: &str) -> CacheResult<()>;

    /// Stop background eviction and wait for it to exit.
    async fn shutdown(&self) {}
}

/// Expiry settings shared by all backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    /// Entry lifetime; zero means entries never expire.
    pub ttl: Duration,
    /// Period of the eviction sweep; zero disables it.
    pub sweep_interval: Duration,
}

impl TtlPolicy {
    /// Build a policy from signed second counts as they arrive from
    /// configuration. Negative values are rejected.
    pub fn from_secs(ttl_secs: i64, sweep_interval_secs: i64) -> CacheResult<Self> {
        let ttl = u64::try_from(ttl_secs)
            .map_err(|_| CacheError::InvalidConfig(format!("ttl must not be negative (got {ttl_secs}s)")))?;
        let sweep_interval = u64::try_from(sweep_interval_secs).map_err(|_| {
            CacheError::InvalidConfig(format!(
                "sweep interval must not be negative (got {sweep_interval_secs}s)"
            ))
        })?;
        Ok(Self {
            ttl: Duration::from_secs(ttl),
            sweep_interval: Duration::from_secs(sweep_interval),
        })
    }

    pub fn never_expires() -> Self {
        Self { ttl: Duration::ZERO, sweep_interval: Duration::ZERO }
    }

    pub fn expires(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Whether a periodic sweep should run at all.
    pub fn sweeps(&self) -> bool {
        self.expires() && !self.sweep_interval.is_zero()
    }

    /// An entry is expired once its age reaches the TTL.
    pub fn is_expired(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if !self.expires() {
            return false;
        }
        match TimeDelta::from_std(self.ttl) {
            Ok(ttl) => now.signed_duration_since(stored_at) >= ttl,
            // Too large to represent: effectively never.
            Err(_) => false,
        }
    }
}

/// Persisted form of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub value: String,
    pub stored_at: DateTime<Utc>,
}

impl StoredEntry {
    pub fn stamped(value: impl Into<String>) -> Self {
        Self { value: value.into(), stored_at: Utc::now() }
    }

    pub fn encode(&self) -> CacheResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// `None` for bytes that are not a valid entry.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        match serde_json::from_slice(bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(error = %e, "undecodable cache entry");
                None
            }
        }
    }
}

/// Which backend to construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    Redb { path: PathBuf, table: String },
    Redis { url: String, key_prefix: Option<String> },
    Memory,
}

/// Construct the configured backend. [`ConversationCache::initialize`] must
/// still be called before use.
pub fn open(backend: &CacheBackend, policy: TtlPolicy) -> CacheResult<Arc<dyn ConversationCache>> {
    let cache: Arc<dyn ConversationCache> = match backend {
        CacheBackend::Redb { path, table } => Arc::new(RedbCache::open(path, table, policy)?),
        CacheBackend::Redis { url, key_prefix } => {
            Arc::new(RedisCache::open(url, key_prefix.clone(), policy)?)
        }
        CacheBackend::Memory => Arc::new(MemoryCache::new(policy)),
    };
    Ok(cache)
}
