//! Presence query handler.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::web_client::state::SharedState;
use crate::web_client::utils::api_error;

/// GET /api/presence/:user_id - Whether a user is reachable right now, and
/// when they were last seen if not.
pub async fn presence_handler(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> Response {
    let st = state.lock().await;
    let online = st.presence.is_online(&user_id);
    // The in-memory value is the freshest; the persisted one survives
    // restarts.
    let last_seen_at = match st.presence.last_seen(&user_id) {
        Some(ts) => Some(ts),
        None => match st.storage.get_user(&user_id) {
            Ok(Some(u)) => u.last_seen_at,
            Ok(None) => return api_error(StatusCode::NOT_FOUND, format!("user {user_id}")),
            Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
    };
    let json = serde_json::json!({
        "success": true,
        "user_id": user_id,
        "online": online,
        "last_seen_at": last_seen_at,
    });
    (StatusCode::OK, axum::Json(json)).into_response()
}
