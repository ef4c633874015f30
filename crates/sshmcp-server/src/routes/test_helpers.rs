//! Shared test utilities for route handler tests.

#![allow(clippy::unwrap_used, clippy::missing_panics_doc, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::StatusCode;
use sshmcp_common::{AuthMaterial, CommandPolicy, RemoteTarget};

use crate::auth::CredentialGate;
use crate::coordinator::ExecutionCoordinator;
use crate::executor::mock::ScriptedTransport;
use crate::session::SessionRegistry;
use crate::state::AppState;

/// Assert an HTTP response has the expected status code and return the body.
///
/// On failure, prints the response body so the test output shows the error.
pub async fn assert_status(resp: axum::response::Response, expected: StatusCode) -> Bytes {
    let actual = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), 65536)
        .await
        .unwrap_or_default();
    if actual != expected {
        let body_str = String::from_utf8_lossy(&body);
        panic!(
            "assertion `left == right` failed\n  left: {actual}\n right: {expected}\n  body: {body_str}"
        );
    }
    body
}

/// `AppState` over an echoing transport with an open policy.
pub fn make_state(token: Option<&str>) -> AppState {
    let coordinator = ExecutionCoordinator::new(
        CommandPolicy::default(),
        Arc::new(ScriptedTransport::echoing()),
        RemoteTarget {
            host: "127.0.0.1".to_string(),
            port: 22,
            username: "ops".to_string(),
            auth: AuthMaterial::default(),
        },
        4,
        SessionRegistry::new(Duration::from_secs(60)),
    );
    AppState {
        coordinator: Arc::new(coordinator),
        gate: Arc::new(CredentialGate::new(token)),
    }
}
