//! WebSocket upgrade and session handling.
//!
//! Each authenticated WebSocket connection registers one presence session.
//! The session task forwards two event streams to the client: its private
//! notification channel (directed deliveries) and the registry's broadcast
//! channel (online/offline events). When the registry supersedes this
//! session with a newer one, the private channel closes and the loop exits.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::sync::{broadcast, mpsc};

use crate::presence::SessionHandle;
use crate::web_client::config::MAX_WS_CONNECTIONS;
use crate::web_client::state::SharedState;
use crate::web_client::utils::{api_error, authed_user, ensure_actor, now_secs};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<SharedState>,
) -> Response {
    let user = match authed_user(&headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    // Check connection limit before upgrading.
    let ws_count = {
        let st = state.lock().await;
        if let Err(resp) = ensure_actor(&st.storage, &user, now_secs()) {
            return resp;
        }
        Arc::clone(&st.ws_connection_count)
    };

    let current = ws_count.load(Ordering::Relaxed);
    if current >= MAX_WS_CONNECTIONS {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("too many WebSocket connections (max {MAX_WS_CONNECTIONS})"),
        );
    }

    let user_id = user.user_id;
    ws.on_upgrade(move |socket| ws_session(socket, state, user_id))
        .into_response()
}

async fn ws_session(mut socket: WebSocket, state: SharedState, user_id: String) {
    let session_id: u64 = rand::random();
    let (presence, ws_count) = {
        let st = state.lock().await;
        (Arc::clone(&st.presence), Arc::clone(&st.ws_connection_count))
    };
    ws_count.fetch_add(1, Ordering::Relaxed);

    // Subscribe to presence broadcasts before registering so this session
    // does not miss events racing with its own registration.
    let mut presence_rx = presence.subscribe();
    let (tx, mut rx) = mpsc::unbounded_channel();
    presence.register(
        &user_id,
        SessionHandle::new(session_id, tx),
        now_secs(),
    );
    crate::wlog!(
        "ws: {} connected ({})",
        crate::logging::user_id(&user_id),
        crate::logging::session_id(session_id)
    );

    loop {
        tokio::select! {
            // Directed deliveries for this session.
            delivery = rx.recv() => {
                match delivery {
                    Some(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if socket.send(WsMessage::Text(json)).await.is_err() {
                                break; // client disconnected
                            }
                        }
                    }
                    // Handle dropped by the registry: a newer session for
                    // this user superseded us.
                    None => break,
                }
            }
            // Presence broadcasts for everyone.
            result = presence_rx.recv() => {
                match result {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if socket.send(WsMessage::Text(json)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        crate::wlog!("ws client lagged, skipped {n} presence events");
                        // Notify client so it can refresh.
                        let lag_msg = serde_json::json!({
                            "type": "events_missed",
                            "count": n,
                        });
                        if let Ok(json) = serde_json::to_string(&lag_msg) {
                            if socket.send(WsMessage::Text(json)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            // Client traffic: only ping/close matter.
            msg = socket.recv() => {
                match msg {
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = socket.send(WsMessage::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }

    // Deregister only succeeds if this session still owns the entry; a
    // superseded session must not record a bogus offline event.
    let now = now_secs();
    if presence.deregister(&user_id, session_id, now) {
        let st = state.lock().await;
        if let Err(e) = st.storage.set_last_seen(&user_id, now) {
            crate::wlog!(
                "ws: failed to persist last-seen for {}: {}",
                crate::logging::user_id(&user_id),
                e
            );
        }
        crate::wlog!(
            "ws: {} disconnected ({})",
            crate::logging::user_id(&user_id),
            crate::logging::session_id(session_id)
        );
    }
    ws_count.fetch_sub(1, Ordering::Relaxed);
}
