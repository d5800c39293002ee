//! In-process backend with the same TTL semantics as the embedded store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::sweeper::Sweeper;
use super::{ConversationCache, StoredEntry, TtlPolicy};
use crate::error::{CacheError, CacheResult};

const BACKEND: &str = "memory";

type Entries = Arc<Mutex<BTreeMap<String, StoredEntry>>>;

pub struct MemoryCache {
    entries: Entries,
    policy: TtlPolicy,
    sweeper: Mutex<Option<Sweeper>>,
}

impl MemoryCache {
    pub fn new(policy: TtlPolicy) -> Self {
        Self {
            entries: Arc::default(),
            policy,
            sweeper: Mutex::new(None),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full entry including its timestamp.
    pub fn entry(&self, conversation_id: &str) -> Option<StoredEntry> {
        lock(&self.entries).get(conversation_id).cloned()
    }

    /// Remove entries expired as of `now`. Returns how many were removed.
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        sweep(&self.entries, self.policy, now)
    }
}

fn lock(entries: &Entries) -> MutexGuard<'_, BTreeMap<String, StoredEntry>> {
    entries.lock().unwrap_or_else(|e| e.into_inner())
}

fn sweep(entries: &Entries, policy: TtlPolicy, now: DateTime<Utc>) -> usize {
    let mut map = lock(entries);
    let before = map.len();
    map.retain(|_, entry| !policy.is_expired(entry.stored_at, now));
    before - map.len()
}

#[async_trait]
impl ConversationCache for MemoryCache {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn initialize(&self) -> CacheResult<()> {
        if !self.policy.sweeps() {
            return Ok(());
        }
        let mut slot = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            let entries = Arc::clone(&self.entries);
            let policy = self.policy;
            *slot = Some(Sweeper::spawn(BACKEND, policy.sweep_interval, move || {
                let removed = sweep(&entries, policy, Utc::now());
                async move { Ok::<_, CacheError>(removed) }
            }));
        }
        Ok(())
    }

    async fn read(&self, conversation_id: &str) -> CacheResult<Option<String>> {
        Ok(lock(&self.entries).get(conversation_id).map(|e| e.value.clone()))
    }

    async fn write(&self, conversation_id: &str, value: &str) -> CacheResult<()> {
        lock(&self.entries).insert(conversation_id.to_owned(), StoredEntry::stamped(value));
        Ok(())
    }

    async fn delete_if_expired(&self, key: &str) -> CacheResult<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }

    async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
        }
    }
}
