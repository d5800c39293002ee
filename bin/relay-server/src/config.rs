//! Server configuration, loaded from environment variables at startup.

use std::path::PathBuf;

use anyhow::{Context, bail};
use relay_core::{CacheBackend, CacheError, CacheResult, CaptureSettings, PersistSettings, TtlPolicy};

/// Runtime configuration for relay-server.
///
/// Every field has a default so the server starts without any environment
/// variables set. Values that can be invalid (backend name, modes, malformed
/// or negative durations) are checked by the accessor methods, and `main` treats any
/// failure there as fatal.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// Base URL of the upstream chat-completion API.
    pub upstream_url: String,

    /// `redb`, `redis` or `memory`.
    pub cache_backend: String,

    /// File backing the embedded store.
    pub redb_path: String,

    /// Namespace (table) inside the embedded store.
    pub redb_table: String,

    pub redis_url: String,

    /// Optional `prefix:` put in front of every networked-store key.
    pub redis_prefix: Option<String>,

    /// Entry lifetime in seconds; 0 keeps entries forever. Kept as text so
    /// a malformed value fails startup instead of falling back silently.
    pub cache_ttl_secs: String,

    /// Eviction sweep period in seconds; 0 disables the sweep.
    pub sweep_interval_secs: String,

    /// `fingerprint` or `reply`.
    pub store_mode: String,

    /// `prefix` or `split`.
    pub fingerprint_mode: String,

    /// JSON pointer to the reply in a non-streamed completion.
    pub json_content_pointer: String,

    /// JSON pointer to the delta in one streamed event.
    pub stream_content_pointer: String,

    /// Request header carrying the conversation id.
    pub conversation_header: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        let capture = CaptureSettings::default();
        Self {
            bind_address: "0.0.0.0:3000".to_owned(),
            upstream_url: "https://api.openai.com".to_owned(),
            cache_backend: "redb".to_owned(),
            redb_path: "relay.redb".to_owned(),
            redb_table: "conversations".to_owned(),
            redis_url: "redis://127.0.0.1:6379".to_owned(),
            redis_prefix: None,
            cache_ttl_secs: "3600".to_owned(),
            sweep_interval_secs: "60".to_owned(),
            store_mode: "fingerprint".to_owned(),
            fingerprint_mode: "prefix".to_owned(),
            json_content_pointer: capture.json_content_pointer,
            stream_content_pointer: capture.stream_content_pointer,
            conversation_header: "x-conversation-id".to_owned(),
            log_level: "info".to_owned(),
            log_json: false,
        }
    }
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            bind_address: env_or("RELAY_BIND", &d.bind_address),
            upstream_url: env_or("RELAY_UPSTREAM_URL", &d.upstream_url),
            cache_backend: env_or("RELAY_CACHE_BACKEND", &d.cache_backend),
            redb_path: env_or("RELAY_REDB_PATH", &d.redb_path),
            redb_table: env_or("RELAY_REDB_TABLE", &d.redb_table),
            redis_url: env_or("RELAY_REDIS_URL", &d.redis_url),
            redis_prefix: std::env::var("RELAY_REDIS_PREFIX").ok().filter(|p| !p.is_empty()),
            cache_ttl_secs: env_or("RELAY_CACHE_TTL_SECS", &d.cache_ttl_secs),
            sweep_interval_secs: env_or("RELAY_SWEEP_INTERVAL_SECS", &d.sweep_interval_secs),
            store_mode: env_or("RELAY_STORE_MODE", &d.store_mode),
            fingerprint_mode: env_or("RELAY_FINGERPRINT_MODE", &d.fingerprint_mode),
            json_content_pointer: env_or("RELAY_JSON_CONTENT_POINTER", &d.json_content_pointer),
            stream_content_pointer: env_or("RELAY_STREAM_CONTENT_POINTER", &d.stream_content_pointer),
            conversation_header: env_or("RELAY_CONVERSATION_HEADER", &d.conversation_header),
            log_level: env_or("RELAY_LOG", &d.log_level),
            log_json: std::env::var("RELAY_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(d.log_json),
        }
    }

    pub fn cache_backend(&self) -> anyhow::Result<CacheBackend> {
        Ok(match self.cache_backend.to_ascii_lowercase().as_str() {
            "redb" => CacheBackend::Redb {
                path: PathBuf::from(&self.redb_path),
                table: self.redb_table.clone(),
            },
            "redis" => CacheBackend::Redis {
                url: self.redis_url.clone(),
                key_prefix: self.redis_prefix.clone(),
            },
            "memory" => CacheBackend::Memory,
            other => bail!("unknown RELAY_CACHE_BACKEND '{other}' (expected redb, redis or memory)"),
        })
    }

    pub fn ttl_policy(&self) -> CacheResult<TtlPolicy> {
        TtlPolicy::from_secs(
            parse_secs("RELAY_CACHE_TTL_SECS", &self.cache_ttl_secs)?,
            parse_secs("RELAY_SWEEP_INTERVAL_SECS", &self.sweep_interval_secs)?,
        )
    }

    pub fn persist_settings(&self) -> anyhow::Result<PersistSettings> {
        Ok(PersistSettings {
            store: self
                .store_mode
                .parse()
                .with_context(|| format!("invalid RELAY_STORE_MODE '{}'", self.store_mode))?,
            fingerprint: self
                .fingerprint_mode
                .parse()
                .with_context(|| format!("invalid RELAY_FINGERPRINT_MODE '{}'", self.fingerprint_mode))?,
        })
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            json_content_pointer: self.json_content_pointer.clone(),
            stream_content_pointer: self.stream_content_pointer.clone(),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_secs(key: &str, raw: &str) -> CacheResult<i64> {
    raw.trim()
        .parse()
        .map_err(|_| CacheError::InvalidConfig(format!("{key} must be a whole number of seconds, got '{raw}'")))
}
