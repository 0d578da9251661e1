//! Block/unblock handlers.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;

use crate::engine::{self, EngineCtx};
use crate::web_client::state::SharedState;
use crate::web_client::utils::{api_outcome, authed_user, engine_error, ensure_actor, now_secs};

pub async fn block_handler(
    State(state): State<SharedState>,
    Path(target_id): Path<String>,
    headers: HeaderMap,
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
    match engine::block(&cx, &user.user_id, &target_id, now) {
        Ok(outcome) => api_outcome(&outcome),
        Err(e) => engine_error(e),
    }
}

pub async fn unblock_handler(
    State(state): State<SharedState>,
    Path(target_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let user = match authed_user(&headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let st = state.lock().await;
    if let Err(resp) = ensure_actor(&st.storage, &user, now_secs()) {
        return resp;
    }
    let cx = EngineCtx {
        storage: &st.storage,
        presence: &st.presence,
    };
    match engine::unblock(&cx, &user.user_id, &target_id) {
        Ok(outcome) => api_outcome(&outcome),
        Err(e) => engine_error(e),
    }
}
