//! relay-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Open and initialise the conversation cache.
//! 4. Build the lifecycle coordinator and shared state.
//! 5. Build the Axum router and start the HTTP server with graceful shutdown.
//! 6. Finalize in-flight captures, then stop the cache.

mod config;
mod error;
mod middleware;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use relay_core::{Coordinator, cache};
use tracing::{info, warn};

use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: RELAY_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "relay-server starting");

    // ── 3. Conversation cache ──────────────────────────────────────────────────
    let policy = cfg.ttl_policy()?;
    let backend = cfg.cache_backend()?;
    let cache = cache::open(&backend, policy)?;
    cache.initialize().await?;
    info!(
        backend = cache.backend_name(),
        ttl_secs = policy.ttl.as_secs(),
        sweep_secs = policy.sweep_interval.as_secs(),
        "conversation cache ready"
    );

    // ── 4. Shared application state ────────────────────────────────────────────
    let coordinator = Arc::new(Coordinator::new(Arc::clone(&cache), cfg.persist_settings()?));
    let state = Arc::new(AppState::new(cfg.clone(), Arc::clone(&coordinator))?);

    // ── 5. HTTP server with graceful shutdown ──────────────────────────────────
    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, upstream = %cfg.upstream_url, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // ── 6. Drain ───────────────────────────────────────────────────────────────
    let pending = coordinator.in_flight();
    if pending > 0 {
        info!(pending, "waiting for in-flight captures to finalize");
    }
    coordinator.drain().await;
    cache.shutdown().await;

    info!("relay-server stopped");
    Ok(())
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c    => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
