mod health;
mod mcp;
pub mod middleware;
#[cfg(test)]
pub mod test_helpers;

use axum::{
    Router,
    routing::{get, post_service},
};

use crate::state::AppState;

/// Header carrying the session identifier issued by `initialize`.
pub const SESSION_HEADER: &str = "mcp-session-id";
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

pub fn create_router(state: AppState) -> Router {
    let service = mcp::service(&state);
    let auth = axum::middleware::from_fn_with_state(state.clone(), middleware::require_auth);
    let sessions = axum::middleware::from_fn_with_state(state.clone(), middleware::track_session);
    Router::new()
        .route("/health", get(health::health))
        .route(
            "/",
            post_service(service.clone())
                .get_service(service.clone())
                .delete_service(service)
                .route_layer(sessions)
                .route_layer(auth)
                .head(mcp::head),
        )
        .with_state(state)
}
