use std::sync::Arc;

use crate::auth::CredentialGate;
use crate::coordinator::ExecutionCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ExecutionCoordinator>,
    pub gate: Arc<CredentialGate>,
}
