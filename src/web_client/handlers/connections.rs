//! Connection request lifecycle handlers.
//!
//! All operations are keyed by the counterpart user id; the engine re-reads
//! the edge state from storage, so the client never supplies the state it
//! believes the pair is in.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::engine::{self, ConnectionList, EngineCtx, EngineError, ListKind};
use crate::web_client::state::SharedState;
use crate::web_client::utils::{
    api_error, api_outcome, authed_user, engine_error, ensure_actor, now_secs, user_to_json,
};

type ConnOp = fn(&EngineCtx<'_>, &str, &str, u64) -> Result<engine::ActionOutcome, EngineError>;

async fn run_connection_op(
    state: SharedState,
    other_id: String,
    headers: HeaderMap,
    op: ConnOp,
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
    match op(&cx, &user.user_id, &other_id, now) {
        Ok(outcome) => api_outcome(&outcome),
        Err(e) => engine_error(e),
    }
}

pub async fn send_request_handler(
    State(state): State<SharedState>,
    Path(other_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    run_connection_op(state, other_id, headers, engine::send_request).await
}

pub async fn cancel_request_handler(
    State(state): State<SharedState>,
    Path(other_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    run_connection_op(state, other_id, headers, engine::cancel_request).await
}

pub async fn accept_request_handler(
    State(state): State<SharedState>,
    Path(other_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    run_connection_op(state, other_id, headers, engine::accept_request).await
}

pub async fn reject_request_handler(
    State(state): State<SharedState>,
    Path(other_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    run_connection_op(state, other_id, headers, engine::reject_request).await
}

pub async fn remove_friend_handler(
    State(state): State<SharedState>,
    Path(other_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    run_connection_op(state, other_id, headers, engine::remove_friend).await
}

pub async fn connection_status_handler(
    State(state): State<SharedState>,
    Path(other_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let user = match authed_user(&headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let st = state.lock().await;
    let cx = EngineCtx {
        storage: &st.storage,
        presence: &st.presence,
    };
    match engine::connection_status(&cx, &user.user_id, &other_id) {
        Ok(status) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({ "success": true, "status": status })),
        )
            .into_response(),
        Err(e) => engine_error(e),
    }
}

#[derive(Deserialize)]
pub struct ListQuery {
    kind: String,
}

pub async fn connections_list_handler(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> Response {
    let user = match authed_user(&headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let Some(kind) = ListKind::parse(&query.kind) else {
        return api_error(
            StatusCode::BAD_REQUEST,
            format!("unknown list kind '{}'", query.kind),
        );
    };
    let st = state.lock().await;
    let cx = EngineCtx {
        storage: &st.storage,
        presence: &st.presence,
    };
    match engine::connections_list(&cx, &user.user_id, kind) {
        Ok(ConnectionList::Users(users)) => {
            let json: Vec<serde_json::Value> = users
                .iter()
                .map(|u| {
                    let mut j = user_to_json(u);
                    j["online"] = serde_json::json!(st.presence.is_online(&u.user_id));
                    j
                })
                .collect();
            (
                StatusCode::OK,
                axum::Json(serde_json::json!({ "success": true, "users": json })),
            )
                .into_response()
        }
        Ok(ConnectionList::Pending(edges)) => {
            let json: Vec<serde_json::Value> = edges
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "from_user": e.from_user,
                        "to_user": e.to_user,
                        "created_at": e.created_at,
                    })
                })
                .collect();
            (
                StatusCode::OK,
                axum::Json(serde_json::json!({ "success": true, "requests": json })),
            )
                .into_response()
        }
        Err(e) => engine_error(e),
    }
}
