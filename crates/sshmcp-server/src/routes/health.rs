use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;

use crate::mcp::protocol_version;
use crate::state::AppState;

/// Liveness check. Never touches the remote host.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "protocol": protocol_version(),
            "sessions": state.coordinator.sessions().len(),
        })),
    )
}
