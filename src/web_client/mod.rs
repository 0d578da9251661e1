//! weft server: REST API + WebSocket front for the connection engine.
//!
//! Hosts the graph operations, the presence registry, and the notification
//! pipeline behind an Axum router. Identity is supplied per request by an
//! upstream auth layer; state persists in SQLite.

pub mod config;
pub mod handlers;
pub mod router;
pub mod state;
pub mod utils;

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use clap::Parser;

use crate::presence::PresenceRegistry;
use crate::storage::Storage;

use config::{Cli, Config, WS_CHANNEL_CAPACITY};
use state::{AppState, SharedState};
use utils::now_secs;

/// Entry point: parse CLI, open storage, start server.
pub async fn run() {
    let cli = Cli::parse();
    let config = Config::from_cli_and_env(cli);

    crate::logging::init();

    crate::wlog!("weft starting");
    crate::wlog!("  data directory: {}", config.data_dir.display());

    let db_path = config.data_dir.join("weft.db");
    let storage = Storage::open(&db_path).expect("failed to open database");
    crate::wlog!("  database: {}", db_path.display());

    // Presence is process-wide and lock-protected; one instance owns every
    // live session for the lifetime of the process.
    let presence = Arc::new(PresenceRegistry::new(WS_CHANNEL_CAPACITY));

    let state: SharedState = Arc::new(tokio::sync::Mutex::new(AppState {
        storage,
        presence: Arc::clone(&presence),
        ws_connection_count: Arc::new(AtomicUsize::new(0)),
    }));

    let app = router::build_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind");
    crate::wlog!("weft listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Drain the registry so every connected user gets a last-seen stamp.
    let drained = presence.drain(now_secs());
    if !drained.is_empty() {
        let st = state.lock().await;
        for (user, ts) in &drained {
            if let Err(e) = st.storage.set_last_seen(user, *ts) {
                crate::wlog!(
                    "shutdown: failed to persist last-seen for {}: {}",
                    crate::logging::user_id(user),
                    e
                );
            }
        }
        crate::wlog!("shutdown: drained {} live session(s)", drained.len());
    }
    crate::wlog!("weft stopped");
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    crate::wlog!("shutdown signal received");
}
