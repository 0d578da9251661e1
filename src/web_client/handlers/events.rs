//! Interaction event ingestion.
//!
//! The content layer (posts, comments, messaging) lives outside this
//! service; it reports likes and message arrivals here so they flow through
//! the same dedup window and live-delivery path as graph events.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Deserialize;

use crate::engine::{self, EngineCtx};
use crate::web_client::state::SharedState;
use crate::web_client::utils::{api_outcome, authed_user, engine_error, ensure_actor, now_secs};

#[derive(Deserialize)]
pub struct LikePayload {
    pub owner_id: String,
    /// Optional content reference shown in the notification.
    pub body: Option<String>,
}

#[derive(Deserialize)]
pub struct UnlikePayload {
    pub owner_id: String,
}

#[derive(Deserialize)]
pub struct MessagePayload {
    pub receiver_id: String,
    pub preview: Option<String>,
}

pub async fn like_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    axum::Json(req): axum::Json<LikePayload>,
) -> Response {
    let user = match authed_user(&headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let st = state.lock().await;
    let now = now_secs();
    if let Err(resp) = ensure_actor(&st.storage, &user, now) {
        return resp;
    }
    let cx = EngineCtx {
        storage: &st.storage,
        presence: &st.presence,
    };
    match engine::notify_like(&cx, &user.user_id, &req.owner_id, req.body.as_deref(), now) {
        Ok(outcome) => api_outcome(&outcome),
        Err(e) => engine_error(e),
    }
}

pub async fn unlike_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    axum::Json(req): axum::Json<UnlikePayload>,
) -> Response {
    let user = match authed_user(&headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let st = state.lock().await;
    let now = now_secs();
    if let Err(resp) = ensure_actor(&st.storage, &user, now) {
        return resp;
    }
    let cx = EngineCtx {
        storage: &st.storage,
        presence: &st.presence,
    };
    match engine::revoke_like(&cx, &user.user_id, &req.owner_id, now) {
        Ok(outcome) => api_outcome(&outcome),
        Err(e) => engine_error(e),
    }
}

pub async fn message_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    axum::Json(req): axum::Json<MessagePayload>,
) -> Response {
    let user = match authed_user(&headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let st = state.lock().await;
    let now = now_secs();
    if let Err(resp) = ensure_actor(&st.storage, &user, now) {
        return resp;
    }
    let cx = EngineCtx {
        storage: &st.storage,
        presence: &st.presence,
    };
    match engine::notify_message(
        &cx,
        &user.user_id,
        &req.receiver_id,
        req.preview.as_deref(),
        now,
    ) {
        Ok(outcome) => api_outcome(&outcome),
        Err(e) => engine_error(e),
    }
}
