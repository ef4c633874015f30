//! MCP server surface: the tool catalog and dispatch behind `rmcp`.

pub mod tools;

use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, ServerHandler,
    model::{
        CallToolRequestParams, CallToolResult, Implementation, ListToolsResult,
        PaginatedRequestParams, ProtocolVersion, ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
};
use serde_json::Value;

use crate::coordinator::ExecutionCoordinator;

pub const SERVER_NAME: &str = "sshmcp-server";

/// The protocol revision advertised in `initialize` and on `HEAD /`.
pub fn protocol_version() -> String {
    serde_json::to_value(ProtocolVersion::default())
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// One handler per MCP session; all of them share the coordinator.
#[derive(Clone)]
pub struct SshMcpServer {
    coordinator: Arc<ExecutionCoordinator>,
}

impl SshMcpServer {
    pub const fn new(coordinator: Arc<ExecutionCoordinator>) -> Self {
        Self { coordinator }
    }
}

impl ServerHandler for SshMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                title: Some("SSH MCP Server".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Runs shell commands and file operations on a remote host over SSH. \
                Commands are subject to the server's allow and block lists."
                    .to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            meta: None,
            tools: tools::catalog(),
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let name = request.name.to_string();
        let arguments = Value::Object(request.arguments.unwrap_or_default());
        tracing::info!(tool = %name, "tool call");

        // Detached so a dropped client does not cancel an in-flight command.
        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move { tools::call_tool(&coordinator, &name, arguments).await })
            .await
            .map_err(|e| {
                tracing::error!("tool task failed: {e}");
                McpError::internal_error("tool task failed", None)
            })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use crate::routes::test_helpers::make_state;

    use super::*;

    #[test]
    fn info_advertises_tools_and_name() {
        let server = SshMcpServer::new(make_state(None).coordinator);
        let info = server.get_info();
        assert_eq!(info.server_info.name, SERVER_NAME);
        assert!(info.capabilities.tools.is_some());
        assert!(info.instructions.is_some());
    }

    #[test]
    fn protocol_version_is_a_dated_revision() {
        let version = protocol_version();
        assert_eq!(version.len(), "2025-06-18".len());
        assert!(version.starts_with("20"));
    }
}
