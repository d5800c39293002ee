//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderName;
use relay_core::{CaptureSettings, Coordinator};

use crate::config::Config;

/// State shared across all HTTP handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Lifecycle tasks and the conversation cache behind them.
    pub coordinator: Arc<Coordinator>,
    /// Where reply text lives in upstream payloads.
    pub capture: Arc<CaptureSettings>,
    /// Request header carrying the conversation id.
    pub conversation_header: HeaderName,
    /// Client for the upstream chat API.
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config, coordinator: Arc<Coordinator>) -> anyhow::Result<Self> {
        let conversation_header = HeaderName::from_bytes(config.conversation_header.as_bytes())
            .with_context(|| format!("invalid RELAY_CONVERSATION_HEADER '{}'", config.conversation_header))?;
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build upstream HTTP client")?;
        Ok(Self {
            capture: Arc::new(config.capture_settings()),
            config: Arc::new(config),
            coordinator,
            conversation_header,
            http,
        })
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("in_flight", &self.coordinator.in_flight())
            .field("conversation_header", &self.conversation_header)
            .finish()
    }
}
