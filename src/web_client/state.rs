//! Shared application state.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::presence::PresenceRegistry;
use crate::storage::Storage;

pub struct AppState {
    pub storage: Storage,
    /// Injected singleton; also handed to WebSocket tasks directly so
    /// presence operations never contend on the big state lock.
    pub presence: Arc<PresenceRegistry>,
    pub ws_connection_count: Arc<AtomicUsize>,
}

pub type SharedState = Arc<Mutex<AppState>>;
