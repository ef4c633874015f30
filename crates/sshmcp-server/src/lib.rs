pub mod auth;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod mcp;
pub mod routes;
pub mod session;
pub mod state;
