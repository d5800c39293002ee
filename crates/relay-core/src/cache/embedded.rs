//! Durable embedded backend on top of [`redb`].
//!
//! Entries live in one table (the namespace) keyed by conversation id, with
//! the value stored as a JSON-encoded [`StoredEntry`]. redb is synchronous,
//! so every operation runs as a single transaction on the blocking pool.
//!
//! When the [`TtlPolicy`] both expires and sweeps, [`initialize`] starts a
//! periodic task that walks the table in key order inside one write
//! transaction and deletes entries that are expired or fail to decode.
//!
//! [`initialize`]: ConversationCache::initialize

use std::path::Path;
use std::sync::{Arc, Mutex};

use ::redb::{Database, ReadableTable, TableDefinition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use super::sweeper::Sweeper;
use super::{ConversationCache, StoredEntry, TtlPolicy};
use crate::error::{CacheError, CacheResult};

const BACKEND: &str = "redb";

pub struct RedbCache {
    inner: Arc<Inner>,
    sweeper: Mutex<Option<Sweeper>>,
}

struct Inner {
    db: Database,
    table: String,
    policy: TtlPolicy,
}

impl RedbCache {
    /// Open (or create) the database file at `path`. The namespace table is
    /// created by [`ConversationCache::initialize`].
    pub fn open(path: impl AsRef<Path>, table: &str, policy: TtlPolicy) -> CacheResult<Self> {
        let db = Database::create(path.as_ref()).map_err(::redb::Error::from)?;
        Ok(Self {
            inner: Arc::new(Inner { db, table: table.to_owned(), policy }),
            sweeper: Mutex::new(None),
        })
    }

    pub fn policy(&self) -> TtlPolicy {
        self.inner.policy
    }

    /// Run one eviction pass now. Returns the number of entries removed.
    pub async fn sweep_expired(&self) -> CacheResult<usize> {
        self.sweep_expired_at(Utc::now()).await
    }

    /// Run one eviction pass as if the clock read `now`.
    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> CacheResult<usize> {
        let inner = Arc::clone(&self.inner);
        Ok(tokio::task::spawn_blocking(move || inner.sweep(now)).await??)
    }
}

impl Inner {
    fn table_def(&self) -> TableDefinition<'_, &'static str, &'static [u8]> {
        TableDefinition::new(&self.table)
    }

    fn create_table(&self) -> Result<(), ::redb::Error> {
        let txn = self.db.begin_write()?;
        txn.open_table(self.table_def())?;
        txn.commit()?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ::redb::Error> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(self.table_def())?;
        Ok(table.get(key)?.map(|guard| guard.value().to_vec()))
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), ::redb::Error> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(self.table_def())?;
            table.insert(key, bytes)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), ::redb::Error> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(self.table_def())?;
            table.remove(key)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn sweep(&self, now: DateTime<Utc>) -> Result<usize, ::redb::Error> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(self.table_def())?;
            let mut doomed = Vec::new();
            for item in table.iter()? {
                let (key, value) = item?;
                match StoredEntry::decode(value.value()) {
                    Some(entry) if !self.policy.is_expired(entry.stored_at, now) => {}
                    _ => doomed.push(key.value().to_owned()),
                }
            }
            for key in &doomed {
                table.remove(key.as_str())?;
            }
            doomed.len()
        };
        txn.commit()?;
        Ok(removed)
    }
}

#[async_trait]
impl ConversationCache for RedbCache {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn initialize(&self) -> CacheResult<()> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.create_table()).await??;

        let policy = self.inner.policy;
        if !policy.sweeps() {
            info!(table = %self.inner.table, "redb cache ready; eviction sweep disabled");
            return Ok(());
        }

        let mut slot = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            let inner = Arc::clone(&self.inner);
            *slot = Some(Sweeper::spawn(BACKEND, policy.sweep_interval, move || {
                let inner = Arc::clone(&inner);
                async move {
                    let removed = tokio::task::spawn_blocking(move || inner.sweep(Utc::now())).await??;
                    Ok::<_, CacheError>(removed)
                }
            }));
            info!(
                table = %self.inner.table,
                ttl_secs = policy.ttl.as_secs(),
                interval_secs = policy.sweep_interval.as_secs(),
                "redb cache ready; eviction sweep started"
            );
        }
        Ok(())
    }

    async fn read(&self, conversation_id: &str) -> CacheResult<Option<String>> {
        let inner = Arc::clone(&self.inner);
        let key = conversation_id.to_owned();
        let raw = tokio::task::spawn_blocking(move || inner.get(&key)).await??;
        Ok(raw.and_then(|bytes| StoredEntry::decode(&bytes)).map(|entry| entry.value))
    }

    async fn write(&self, conversation_id: &str, value: &str) -> CacheResult<()> {
        let bytes = StoredEntry::stamped(value).encode()?;
        let inner = Arc::clone(&self.inner);
        let key = conversation_id.to_owned();
        tokio::task::spawn_blocking(move || inner.put(&key, &bytes)).await??;
        Ok(())
    }

    async fn delete_if_expired(&self, key: &str) -> CacheResult<()> {
        let inner = Arc::clone(&self.inner);
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || inner.remove(&key)).await??;
        Ok(())
    }

    async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;

    use super::*;

    fn open(dir: &tempfile::TempDir, policy: TtlPolicy) -> RedbCache {
        RedbCache::open(dir.path().join("cache.redb"), "conversations", policy).unwrap()
    }

    #[tokio::test]
    async fn read_before_initialize_reports_missing_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir, TtlPolicy::never_expires());
        let err = cache.read("c1").await.unwrap_err();
        assert!(matches!(err, CacheError::MissingNamespace(ref t) if t == "conversations"));
    }

    #[tokio::test]
    async fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir, TtlPolicy::never_expires());
        cache.initialize().await.unwrap();

        assert_eq!(cache.read("c1").await.unwrap(), None);
        cache.write("c1", "deadbeef").await.unwrap();
        assert_eq!(cache.read("c1").await.unwrap().as_deref(), Some("deadbeef"));
    }

    #[tokio::test]
    async fn last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir, TtlPolicy::never_expires());
        cache.initialize().await.unwrap();

        cache.write("c1", "first").await.unwrap();
        cache.write("c1", "second").await.unwrap();
        assert_eq!(cache.read("c1").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir, TtlPolicy::never_expires());
        cache.initialize().await.unwrap();

        cache.write("c1", "v").await.unwrap();
        cache.delete_if_expired("c1").await.unwrap();
        cache.delete_if_expired("c1").await.unwrap();
        assert_eq!(cache.read("c1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = open(&dir, TtlPolicy::never_expires());
            cache.initialize().await.unwrap();
            cache.write("c1", "durable").await.unwrap();
        }
        let cache = open(&dir, TtlPolicy::never_expires());
        assert_eq!(cache.read("c1").await.unwrap().as_deref(), Some("durable"));
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_entries() {
        let dir = tempfile::tempdir().unwrap();
        let policy = TtlPolicy::from_secs(60, 0).unwrap();
        let cache = open(&dir, policy);
        cache.initialize().await.unwrap();

        cache.write("c1", "v1").await.unwrap();
        let written = Utc::now();

        assert_eq!(cache.sweep_expired_at(written + TimeDelta::seconds(30)).await.unwrap(), 0);
        assert_eq!(cache.read("c1").await.unwrap().as_deref(), Some("v1"));

        assert_eq!(cache.sweep_expired_at(written + TimeDelta::seconds(61)).await.unwrap(), 1);
        assert_eq!(cache.read("c1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sweep_purges_corrupt_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(&dir, TtlPolicy::from_secs(3600, 0).unwrap());
        cache.initialize().await.unwrap();

        cache.inner.put("bad", b"not json").unwrap();
        cache.write("good", "v").await.unwrap();
        assert_eq!(cache.read("bad").await.unwrap(), None);

        assert_eq!(cache.sweep_expired().await.unwrap(), 1);
        assert!(cache.inner.get("bad").unwrap().is_none());
        assert_eq!(cache.read("good").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn background_sweep_evicts_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let policy = TtlPolicy {
            ttl: Duration::from_millis(10),
            sweep_interval: Duration::from_millis(20),
        };
        let cache = open(&dir, policy);
        cache.initialize().await.unwrap();
        cache.write("c1", "short-lived").await.unwrap();

        let mut evicted = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if cache.read("c1").await.unwrap().is_none() {
                evicted = true;
                break;
            }
        }
        assert!(evicted, "background sweep never evicted the entry");

        cache.shutdown().await;
        assert!(cache.sweeper.lock().unwrap().is_none());
    }
}
