//! Notification retrieval handlers: the pull side of delivery.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::web_client::config::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
use crate::web_client::state::SharedState;
use crate::web_client::utils::{api_error, authed_user};

#[derive(Deserialize)]
pub struct ListNotificationsQuery {
    unread: Option<bool>,
    limit: Option<u32>,
}

/// GET /api/notifications - List the actor's notifications.
pub async fn list_notifications_handler(
    State(state): State<SharedState>,
    Query(params): Query<ListNotificationsQuery>,
    headers: HeaderMap,
) -> Response {
    let user = match authed_user(&headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let st = state.lock().await;
    let unread_only = params.unread.unwrap_or(false);
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);

    match st
        .storage
        .list_notifications(&user.user_id, unread_only, limit)
    {
        Ok(notifications) => {
            let json: Vec<serde_json::Value> = notifications
                .iter()
                .map(|n| {
                    serde_json::json!({
                        "id": n.id,
                        "kind": n.kind,
                        "sender_id": n.sender_id,
                        "body": n.body,
                        "created_at": n.created_at,
                        "is_read": n.is_read,
                    })
                })
                .collect();
            (
                StatusCode::OK,
                axum::Json(serde_json::json!({ "success": true, "notifications": json })),
            )
                .into_response()
        }
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// GET /api/notifications/count - Unread notification count.
pub async fn count_notifications_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Response {
    let user = match authed_user(&headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let st = state.lock().await;
    match st.storage.count_unread(&user.user_id) {
        Ok(count) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({ "success": true, "unread": count })),
        )
            .into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// POST /api/notifications/:id/read - Mark one notification as read.
pub async fn mark_read_handler(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    let user = match authed_user(&headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let st = state.lock().await;
    match st.storage.mark_notification_read(id, &user.user_id) {
        Ok(true) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({ "success": true, "id": id })),
        )
            .into_response(),
        Ok(false) => api_error(StatusCode::NOT_FOUND, "notification not found"),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// POST /api/notifications/read-all - Mark all of the actor's notifications
/// as read.
pub async fn mark_all_read_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Response {
    let user = match authed_user(&headers) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let st = state.lock().await;
    match st.storage.mark_all_read(&user.user_id) {
        Ok(count) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({ "success": true, "marked_read": count })),
        )
            .into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
