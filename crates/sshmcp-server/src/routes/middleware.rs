use axum::{
    body::Body,
    extract::{Query, State},
    http::{Method, Request, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::SESSION_HEADER;
use crate::auth::GateOutcome;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Credential gate for every authenticated endpoint.
///
/// Runs before any handler logic and before the body is read. On success the
/// [`AuthContext`](crate::auth::AuthContext) is inserted into the request
/// extensions. Credential values never reach the logs.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let outcome = {
        let header = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let query = Query::<TokenQuery>::try_from_uri(request.uri())
            .ok()
            .and_then(|Query(q)| q.token);
        state.gate.evaluate(header, query.as_deref())
    };

    match outcome {
        GateOutcome::Misconfigured => AppError::Misconfigured.into_response(),
        GateOutcome::Missing => {
            tracing::warn!(path = %request.uri().path(), "request without credentials");
            AppError::MissingCredential.into_response()
        }
        GateOutcome::Invalid { channel } => {
            tracing::warn!(channel = channel.as_str(), "rejected invalid credential");
            AppError::InvalidCredential(channel).into_response()
        }
        GateOutcome::Ok(ctx) => {
            tracing::info!(
                channel = ctx.channel.as_str(),
                fingerprint = %ctx.fingerprint,
                "authenticated request"
            );
            request.extensions_mut().insert(ctx);
            next.run(request).await
        }
    }
}

/// Session bookkeeping around the MCP service.
///
/// A presented session id must be live in the registry, otherwise the request
/// is rejected before the service sees it. Ids issued by `initialize` are
/// registered from the response; a successful `DELETE` ends the session.
pub async fn track_session(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let sessions = state.coordinator.sessions();
    let presented = request
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let method = request.method().clone();

    if let Some(id) = presented.as_deref()
        && sessions.touch(id).is_none()
    {
        tracing::warn!(session_id = %id, "request for unknown session");
        sessions.close(id).await;
        return AppError::InvalidSession.into_response();
    }

    let response = next.run(request).await;
    match presented {
        None => {
            if let Some(id) = response
                .headers()
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
            {
                sessions.register(id).await;
            }
        }
        Some(id) if method == Method::DELETE && response.status().is_success() => {
            sessions.remove(&id);
        }
        Some(_) => {}
    }
    response
}
