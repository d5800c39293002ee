//! relay-core – conversation capture and caching for chat-completion traffic.
//!
//! Components, leaf first:
//! - [`transcript`] – message model and the turn-order validator.
//! - [`fingerprint`] – CRC32 digests over canonical transcript prefixes.
//! - [`capture`] – reply reconstruction from JSON or event-stream bodies.
//! - [`lifecycle`] – completion/cancellation race that finalizes a capture
//!   and writes the result to the cache.
//! - [`cache`] – TTL key/value store with embedded, networked and in-memory
//!   backends.

pub mod cache;
pub mod capture;
pub mod error;
pub mod fingerprint;
pub mod lifecycle;
pub mod transcript;

pub use cache::{CacheBackend, ConversationCache, TtlPolicy};
pub use capture::{CaptureMode, CaptureSettings, ResponseCapture};
pub use error::{CacheError, CacheResult};
pub use lifecycle::{CompletionSignal, Coordinator, Finalized, FingerprintMode, Outcome, PersistSettings, StoreMode};
pub use transcript::{Message, Role, validate};
