use std::sync::Arc;

use axum::{http::StatusCode, response::IntoResponse};
use rmcp::transport::streamable_http_server::{
    StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
};

use super::PROTOCOL_VERSION_HEADER;
use crate::mcp::{SshMcpServer, protocol_version};
use crate::state::AppState;

/// Streamable HTTP transport for `POST`, `GET` and `DELETE /`.
///
/// Sessions live in the coordinator's registry; the service gets its
/// session manager from there.
pub fn service(state: &AppState) -> StreamableHttpService<SshMcpServer, LocalSessionManager> {
    let coordinator = Arc::clone(&state.coordinator);
    StreamableHttpService::new(
        move || Ok(SshMcpServer::new(Arc::clone(&coordinator))),
        state.coordinator.sessions().manager(),
        StreamableHttpServerConfig::default(),
    )
}

/// Protocol discovery, unauthenticated.
pub async fn head() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(PROTOCOL_VERSION_HEADER, protocol_version())],
    )
}
