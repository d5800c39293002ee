//! Per-request race between normal completion and client cancellation.
//!
//! [`Coordinator::begin`] spawns one tracked task per request and hands back
//! a [`CompletionSignal`]. The task waits for whichever happens first:
//!
//! - [`CompletionSignal::complete`] delivers the captured reply
//!   (`Running → Completed`);
//! - the signal is dropped or [`CompletionSignal::cancel`] is called
//!   (`Running → Cancelled`), in which case a fallback reply carrying a fresh
//!   UUID replaces whatever was captured.
//!
//! A third exit, [`CompletionSignal::discard`], retires the task without
//! touching the cache; it is used when the upstream answered with an error.
//!
//! Otherwise the reply is appended to the transcript as an `assistant`
//! message and the derived value is written to the cache exactly once. A
//! failed write is logged and dropped: the client exchange is already over.

use std::sync::Arc;

use strum::{Display, EnumString};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::ConversationCache;
use crate::fingerprint::{fingerprint, fingerprint_split, latest_exchange, prefix};
use crate::transcript::Message;

/// Leading text of the reply cached for a cancelled request.
pub const FALLBACK_PREFIX: &str = "connection closed before the reply completed";

/// What gets written under the conversation id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum StoreMode {
    /// A fingerprint of the finished transcript.
    #[default]
    Fingerprint,
    /// The assistant reply text itself.
    Reply,
}

/// Fingerprint granularity when [`StoreMode::Fingerprint`] is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum FingerprintMode {
    /// One checksum over everything before the final exchange.
    #[default]
    Prefix,
    /// Separate checksums for the earlier conversation and the final exchange.
    Split,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistSettings {
    pub store: StoreMode,
    pub fingerprint: FingerprintMode,
}

impl PersistSettings {
    /// Cache value for a transcript that already ends with `reply`.
    pub fn value_for(&self, transcript: &[Message], reply: &str) -> String {
        match (self.store, self.fingerprint) {
            (StoreMode::Reply, _) => reply.to_owned(),
            (StoreMode::Fingerprint, FingerprintMode::Prefix) => fingerprint(prefix(transcript)),
            (StoreMode::Fingerprint, FingerprintMode::Split) => {
                fingerprint_split(prefix(transcript), latest_exchange(transcript))
            }
        }
    }
}

/// Terminal state of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Outcome {
    Completed,
    Cancelled,
    Discarded,
}

/// Result of a finished lifecycle task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalized {
    pub outcome: Outcome,
    /// Captured reply, or the fallback text on cancellation.
    pub reply: String,
    /// Value written to the cache; `None` when the write failed or the
    /// response was discarded.
    pub stored: Option<String>,
}

/// Owns the lifecycle tasks of all in-flight requests.
pub struct Coordinator {
    cache: Arc<dyn ConversationCache>,
    settings: PersistSettings,
    tracker: TaskTracker,
}

impl Coordinator {
    pub fn new(cache: Arc<dyn ConversationCache>, settings: PersistSettings) -> Self {
        Self { cache, settings, tracker: TaskTracker::new() }
    }

    pub fn cache(&self) -> &Arc<dyn ConversationCache> {
        &self.cache
    }

    pub fn settings(&self) -> PersistSettings {
        self.settings
    }

    /// Number of lifecycle tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Start the lifecycle of one request whose validated history is
    /// `transcript`.
    pub fn begin(
        &self,
        conversation_id: String,
        transcript: Vec<Message>,
    ) -> (CompletionSignal, JoinHandle<Finalized>) {
        let (tx, rx) = oneshot::channel::<Option<String>>();
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let cache = Arc::clone(&self.cache);
        let settings = self.settings;

        let task = self.tracker.spawn(async move {
            let (outcome, reply) = tokio::select! {
                biased;
                reply = rx => match reply {
                    Ok(Some(reply)) => (Outcome::Completed, reply),
                    Ok(None) => (Outcome::Discarded, String::new()),
                    Err(_) => (Outcome::Cancelled, fallback_reply()),
                },
                _ = cancelled.cancelled() => (Outcome::Cancelled, fallback_reply()),
            };
            finalize(cache.as_ref(), settings, &conversation_id, transcript, outcome, reply).await
        });

        let signal = CompletionSignal {
            reply_tx: Some(tx),
            guard: Some(token.clone().drop_guard()),
            token,
        };
        (signal, task)
    }

    /// Refuse new lifecycles and wait for running ones to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Request-side half of a lifecycle. Dropping it without calling
/// [`CompletionSignal::complete`] cancels the request.
pub struct CompletionSignal {
    reply_tx: Option<oneshot::Sender<Option<String>>>,
    guard: Option<DropGuard>,
    token: CancellationToken,
}

impl CompletionSignal {
    /// Report normal completion with the captured reply text.
    pub fn complete(self, reply: String) {
        self.settle(Some(reply));
    }

    /// Retire the lifecycle without writing anything to the cache.
    pub fn discard(self) {
        self.settle(None);
    }

    fn settle(mut self, reply: Option<String>) {
        if let Some(guard) = self.guard.take() {
            let _ = guard.disarm();
        }
        if let Some(tx) = self.reply_tx.take() {
            // Fails only if the task already settled on cancellation.
            let _ = tx.send(reply);
        }
    }

    /// Report cancellation explicitly.
    pub fn cancel(self) {
        self.token.cancel();
    }

    /// Token that fires when this request is cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

fn fallback_reply() -> String {
    format!("{FALLBACK_PREFIX}-{}", Uuid::new_v4())
}

async fn finalize(
    cache: &dyn ConversationCache,
    settings: PersistSettings,
    conversation_id: &str,
    mut transcript: Vec<Message>,
    outcome: Outcome,
    reply: String,
) -> Finalized {
    match outcome {
        Outcome::Completed => debug!(conversation_id, reply_len = reply.len(), "request completed"),
        Outcome::Cancelled => info!(conversation_id, "request cancelled before completion; caching fallback reply"),
        Outcome::Discarded => {
            debug!(conversation_id, "response discarded; cache left untouched");
            return Finalized { outcome, reply, stored: None };
        }
    }

    transcript.push(Message::assistant(reply.clone()));
    let value = settings.value_for(&transcript, &reply);

    let stored = match cache.write(conversation_id, &value).await {
        Ok(()) => Some(value),
        Err(e) => {
            warn!(
                conversation_id,
                backend = cache.backend_name(),
                error = %e,
                "failed to cache conversation"
            );
            None
        }
    };

    Finalized { outcome, reply, stored }
}

#[cfg(test)]
mod tests;
