use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::cache::{MemoryCache, TtlPolicy};
use crate::error::{CacheError, CacheResult};

fn history() -> Vec<Message> {
    vec![
        Message::system("be brief"),
        Message::user("hi"),
        Message::assistant("hello"),
        Message::user("tell me a joke"),
    ]
}

fn coordinator(settings: PersistSettings) -> (Coordinator, Arc<MemoryCache>) {
    let cache = Arc::new(MemoryCache::new(TtlPolicy::never_expires()));
    (Coordinator::new(cache.clone(), settings), cache)
}

fn reply_mode() -> PersistSettings {
    PersistSettings { store: StoreMode::Reply, ..PersistSettings::default() }
}

/// Backend whose writes always fail.
struct BrokenCache;

#[async_trait]
impl ConversationCache for BrokenCache {
    fn backend_name(&self) -> &'static str {
        "broken"
    }
    async fn initialize(&self) -> CacheResult<()> {
        Ok(())
    }
    async fn read(&self, _: &str) -> CacheResult<Option<String>> {
        Ok(None)
    }
    async fn write(&self, _: &str, _: &str) -> CacheResult<()> {
        Err(CacheError::MissingNamespace("conversations".into()))
    }
    async fn delete_if_expired(&self, _: &str) -> CacheResult<()> {
        Ok(())
    }
}

// ── Completion ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn completion_caches_prefix_fingerprint() {
    let (coordinator, cache) = coordinator(PersistSettings::default());
    let (signal, task) = coordinator.begin("c1".into(), history());

    signal.complete("why did the crab cross the road".into());
    let done = task.await.unwrap();

    assert_eq!(done.outcome, Outcome::Completed);
    assert_eq!(done.reply, "why did the crab cross the road");

    let mut finished = history();
    finished.push(Message::assistant(done.reply.clone()));
    let expected = fingerprint(prefix(&finished));
    assert_eq!(done.stored.as_deref(), Some(expected.as_str()));
    assert_eq!(cache.read("c1").await.unwrap(), Some(expected));
}

#[tokio::test]
async fn split_mode_covers_the_new_reply() {
    let settings = PersistSettings { store: StoreMode::Fingerprint, fingerprint: FingerprintMode::Split };
    let (coordinator, cache) = coordinator(settings);

    let (signal, task) = coordinator.begin("c1".into(), history());
    signal.complete("reply one".into());
    let first = task.await.unwrap().stored.unwrap();

    let (signal, task) = coordinator.begin("c1".into(), history());
    signal.complete("reply two".into());
    let second = task.await.unwrap().stored.unwrap();

    let (first_prev, first_latest) = first.split_once(crate::fingerprint::SPLIT_SEPARATOR).unwrap();
    let (second_prev, second_latest) = second.split_once(crate::fingerprint::SPLIT_SEPARATOR).unwrap();
    assert_eq!(first_prev, second_prev);
    assert_ne!(first_latest, second_latest);
    assert_eq!(cache.read("c1").await.unwrap(), Some(second));
}

#[tokio::test]
async fn reply_mode_caches_reply_text() {
    let (coordinator, cache) = coordinator(reply_mode());
    let (signal, task) = coordinator.begin("c1".into(), history());
    signal.complete("the reply".into());
    task.await.unwrap();
    assert_eq!(cache.read("c1").await.unwrap().as_deref(), Some("the reply"));
}

// ── Cancellation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn dropping_the_signal_cancels() {
    let (coordinator, cache) = coordinator(reply_mode());
    let (signal, task) = coordinator.begin("c1".into(), history());
    drop(signal);

    let done = task.await.unwrap();
    assert_eq!(done.outcome, Outcome::Cancelled);
    assert!(done.reply.starts_with(FALLBACK_PREFIX));

    let id = done.reply.rsplit(FALLBACK_PREFIX).next().unwrap().trim_start_matches('-');
    assert!(Uuid::parse_str(id).is_ok(), "fallback should end with a uuid: {}", done.reply);
    assert_eq!(cache.read("c1").await.unwrap(), Some(done.reply));
}

#[tokio::test]
async fn explicit_cancel_and_token_agree() {
    let (coordinator, _cache) = coordinator(reply_mode());
    let (signal, task) = coordinator.begin("c1".into(), history());
    let token = signal.cancellation_token();
    signal.cancel();

    assert!(token.is_cancelled());
    assert_eq!(task.await.unwrap().outcome, Outcome::Cancelled);
}

#[tokio::test]
async fn fallback_replies_never_repeat() {
    let (coordinator, _cache) = coordinator(reply_mode());

    let (signal, first) = coordinator.begin("c1".into(), history());
    drop(signal);
    let (signal, second) = coordinator.begin("c1".into(), history());
    drop(signal);

    let first = first.await.unwrap().reply;
    let second = second.await.unwrap().reply;
    assert_ne!(first, second);
    assert_ne!(first, "the reply");
}

#[tokio::test]
async fn completion_after_disarm_is_not_cancelled() {
    let (coordinator, _cache) = coordinator(reply_mode());
    let (signal, task) = coordinator.begin("c1".into(), history());
    let token = signal.cancellation_token();

    signal.complete("done".into());
    let done = task.await.unwrap();

    assert_eq!(done.outcome, Outcome::Completed);
    assert!(!token.is_cancelled());
}

// ── Failure handling and draining ─────────────────────────────────────────────

#[tokio::test]
async fn cache_failure_is_swallowed() {
    let coordinator = Coordinator::new(Arc::new(BrokenCache), PersistSettings::default());
    let (signal, task) = coordinator.begin("c1".into(), history());
    signal.complete("text".into());

    let done = task.await.unwrap();
    assert_eq!(done.outcome, Outcome::Completed);
    assert_eq!(done.stored, None);
}

#[tokio::test]
async fn drain_waits_for_in_flight_requests() {
    let (coordinator, cache) = coordinator(reply_mode());
    let (signal, _task) = coordinator.begin("c1".into(), history());
    assert_eq!(coordinator.in_flight(), 1);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.complete("late".into());
    });

    coordinator.drain().await;
    assert_eq!(coordinator.in_flight(), 0);
    assert_eq!(cache.read("c1").await.unwrap().as_deref(), Some("late"));
}

#[tokio::test]
async fn discard_leaves_cache_untouched() {
    let (coordinator, cache) = coordinator(reply_mode());
    cache.write("c1", "earlier reply").await.unwrap();

    let (signal, task) = coordinator.begin("c1".into(), history());
    let token = signal.cancellation_token();
    signal.discard();

    let done = task.await.unwrap();
    assert_eq!(done.outcome, Outcome::Discarded);
    assert_eq!(done.stored, None);
    assert!(!token.is_cancelled());
    assert_eq!(cache.read("c1").await.unwrap().as_deref(), Some("earlier reply"));
}
