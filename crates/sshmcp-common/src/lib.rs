//! Shared, I/O-free building blocks for the sshmcp bridge.
//!
//! Everything here is deterministic: the command policy, shell quoting,
//! remote command composition and the result types that travel back to
//! callers. The server crate layers transport and protocol on top.

pub mod compose;
pub mod policy;
pub mod quote;
pub mod result;
pub mod target;

pub use policy::{CommandPolicy, PolicyDecision};
pub use result::{BatchEntry, BatchMode, BatchResult, CommandResult};
pub use target::{AuthMaterial, RemoteTarget, TargetOverride};
