//! User profile handlers.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::web_client::state::SharedState;
use crate::web_client::utils::{api_error, authed_user, ensure_actor, now_secs, user_to_json};

/// GET /api/users/:user_id - A user's display profile plus presence.
pub async fn get_user_handler(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> Response {
    let st = state.lock().await;
    match st.storage.get_user(&user_id) {
        Ok(Some(u)) => {
            let mut j = user_to_json(&u);
            j["online"] = serde_json::json!(st.presence.is_online(&u.user_id));
            (
                StatusCode::OK,
                axum::Json(serde_json::json!({ "success": true, "user": j })),
            )
                .into_response()
        }
        Ok(None) => api_error(StatusCode::NOT_FOUND, format!("user {user_id}")),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// PUT /api/profile - Refresh the actor's display profile from the identity
/// provider's headers.
pub async fn update_profile_handler(
    State(state): State<SharedState>,
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
    match st.storage.get_user(&user.user_id) {
        Ok(Some(u)) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({ "success": true, "user": user_to_json(&u) })),
        )
            .into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "profile vanished"),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
