//! Shared utility functions for the web layer.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::engine::{ActionOutcome, EngineError};
use crate::storage::UserRow;

/// Authenticated actor, as supplied by the upstream identity provider. The
/// auth layer in front of this service injects these headers per request;
/// this core never authenticates users itself.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub user_id: String,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub profile_picture: Option<String>,
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extract the authenticated user from the identity provider's headers.
/// Requests without an identity are rejected before reaching the engine.
pub fn authed_user(headers: &HeaderMap) -> Result<AuthedUser, Response> {
    let Some(user_id) = header_str(headers, "x-user-id") else {
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            "missing identity (x-user-id header)",
        ));
    };
    Ok(AuthedUser {
        user_id,
        username: header_str(headers, "x-username"),
        full_name: header_str(headers, "x-full-name"),
        profile_picture: header_str(headers, "x-profile-picture"),
    })
}

/// Build a standard JSON error response.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = serde_json::json!({ "success": false, "error": message.into() });
    (status, axum::Json(body)).into_response()
}

/// Build a standard JSON success response from an engine outcome.
pub fn api_outcome(outcome: &ActionOutcome) -> Response {
    let body = serde_json::json!({ "success": true, "message": outcome.message });
    (StatusCode::OK, axum::Json(body)).into_response()
}

/// Map an engine error onto the HTTP surface.
pub fn engine_error(e: EngineError) -> Response {
    match e {
        EngineError::Validation(msg) => api_error(StatusCode::BAD_REQUEST, msg),
        EngineError::StateConflict(msg) => api_error(StatusCode::CONFLICT, msg),
        EngineError::Blocked => api_error(
            StatusCode::FORBIDDEN,
            "action not allowed between blocked users",
        ),
        EngineError::NotFound(msg) => api_error(StatusCode::NOT_FOUND, msg),
        EngineError::Storage(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Build the JSON representation of a user profile.
pub fn user_to_json(u: &UserRow) -> serde_json::Value {
    serde_json::json!({
        "user_id": u.user_id,
        "username": u.username,
        "full_name": u.full_name,
        "profile_picture": u.profile_picture,
        "created_at": u.created_at,
        "last_seen_at": u.last_seen_at,
    })
}

/// Refresh the actor's user row from the identity provider's profile
/// headers. Every authenticated request does this so the graph always knows
/// the acting user.
pub fn ensure_actor(
    storage: &crate::storage::Storage,
    user: &AuthedUser,
    now: u64,
) -> Result<(), Response> {
    storage
        .upsert_user(
            &user.user_id,
            user.username.as_deref(),
            user.full_name.as_deref(),
            user.profile_picture.as_deref(),
            now,
        )
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Current time as seconds since UNIX epoch.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
