//! Request authentication.
//!
//! Every authenticated endpoint runs [`gate::CredentialGate::evaluate`] before
//! any handler logic; see `routes::middleware::require_auth`.

pub mod gate;

pub use gate::{AuthContext, CredentialChannel, CredentialGate, GateOutcome};
