//! Axum router construction.

use axum::routing::{get, post, put};
use axum::Router;

use crate::web_client::handlers;
use crate::web_client::state::SharedState;

/// Build the complete Axum router with all API routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        // Health
        .route("/api/health", get(handlers::health::health_handler))
        // Users / profile
        .route("/api/users/:user_id", get(handlers::users::get_user_handler))
        .route("/api/profile", put(handlers::users::update_profile_handler))
        // Follow API
        .route(
            "/api/users/:user_id/follow",
            post(handlers::follows::follow_handler),
        )
        .route(
            "/api/users/:user_id/unfollow",
            post(handlers::follows::unfollow_handler),
        )
        // Block API
        .route(
            "/api/users/:user_id/block",
            post(handlers::blocks::block_handler),
        )
        .route(
            "/api/users/:user_id/unblock",
            post(handlers::blocks::unblock_handler),
        )
        // Connection request lifecycle
        .route(
            "/api/connections/:user_id/request",
            post(handlers::connections::send_request_handler),
        )
        .route(
            "/api/connections/:user_id/cancel",
            post(handlers::connections::cancel_request_handler),
        )
        .route(
            "/api/connections/:user_id/accept",
            post(handlers::connections::accept_request_handler),
        )
        .route(
            "/api/connections/:user_id/reject",
            post(handlers::connections::reject_request_handler),
        )
        .route(
            "/api/connections/:user_id",
            axum::routing::delete(handlers::connections::remove_friend_handler),
        )
        .route(
            "/api/connections/:user_id/status",
            get(handlers::connections::connection_status_handler),
        )
        .route(
            "/api/connections",
            get(handlers::connections::connections_list_handler),
        )
        // Notifications API
        .route(
            "/api/notifications",
            get(handlers::notifications::list_notifications_handler),
        )
        .route(
            "/api/notifications/count",
            get(handlers::notifications::count_notifications_handler),
        )
        .route(
            "/api/notifications/read-all",
            post(handlers::notifications::mark_all_read_handler),
        )
        .route(
            "/api/notifications/:id/read",
            post(handlers::notifications::mark_read_handler),
        )
        // Interaction events from the content layer
        .route("/api/events/like", post(handlers::events::like_handler))
        .route("/api/events/unlike", post(handlers::events::unlike_handler))
        .route(
            "/api/events/message",
            post(handlers::events::message_handler),
        )
        // Presence
        .route(
            "/api/presence/:user_id",
            get(handlers::presence::presence_handler),
        )
        // WebSocket
        .route("/api/ws", get(handlers::websocket::ws_handler))
        .with_state(state)
}
