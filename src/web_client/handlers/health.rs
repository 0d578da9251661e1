//! Health check handler.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::web_client::state::SharedState;

pub async fn health_handler(State(state): State<SharedState>) -> Response {
    let st = state.lock().await;
    let json = serde_json::json!({
        "status": "ok",
        "online_users": st.presence.online_count(),
    });
    (StatusCode::OK, axum::Json(json)).into_response()
}
