//! End-to-end MCP conversations through the router, backed by a scripted
//! remote host.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header::CONTENT_TYPE},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use sshmcp_common::{AuthMaterial, CommandPolicy, RemoteTarget};
use sshmcp_server::auth::CredentialGate;
use sshmcp_server::coordinator::ExecutionCoordinator;
use sshmcp_server::executor::mock::{ScriptedTransport, in_memory_host};
use sshmcp_server::routes::{SESSION_HEADER, create_router};
use sshmcp_server::session::SessionRegistry;
use sshmcp_server::state::AppState;
use tower::ServiceExt;

const TOKEN: &str = "integration-secret";

struct Harness {
    app: Router,
    transport: Arc<ScriptedTransport>,
}

impl Harness {
    fn new(transport: ScriptedTransport, policy: CommandPolicy) -> Self {
        let transport = Arc::new(transport);
        let coordinator = ExecutionCoordinator::new(
            policy,
            Arc::clone(&transport) as Arc<dyn sshmcp_server::executor::RemoteTransport>,
            RemoteTarget {
                host: "10.9.8.7".to_string(),
                port: 22,
                username: "deploy".to_string(),
                auth: AuthMaterial::default(),
            },
            4,
            SessionRegistry::new(Duration::from_secs(300)),
        );
        let state = AppState {
            coordinator: Arc::new(coordinator),
            gate: Arc::new(CredentialGate::new(Some(TOKEN))),
        };
        Self {
            app: create_router(state),
            transport,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Option<String>, Value) {
        let resp = self.app.clone().oneshot(request).await.unwrap();
        let status = resp.status();
        let session_id = resp
            .headers()
            .get(SESSION_HEADER)
            .map(|v| v.to_str().unwrap().to_string());
        let event_stream = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("text/event-stream"));
        let bytes = tokio::time::timeout(Duration::from_secs(5), resp.into_body().collect())
            .await
            .expect("response body did not finish")
            .unwrap()
            .to_bytes();
        let text = String::from_utf8_lossy(&bytes);
        let json = if event_stream {
            last_event(&text)
        } else {
            serde_json::from_str(&text).unwrap_or(Value::Null)
        };
        (status, session_id, json)
    }

    async fn post(&self, session: Option<&str>, body: &Value) -> (StatusCode, Option<String>, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/")
            .header("authorization", format!("Bearer {TOKEN}"))
            .header("content-type", "application/json")
            .header("accept", "application/json, text/event-stream");
        if let Some(id) = session {
            builder = builder.header(SESSION_HEADER, id);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn initialize(&self) -> String {
        let (status, session, body) = self
            .post(
                None,
                &json!({
                    "jsonrpc": "2.0", "id": 0, "method": "initialize",
                    "params": {
                        "protocolVersion": "2025-06-18",
                        "capabilities": {},
                        "clientInfo": { "name": "it", "version": "0.0.1" }
                    }
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["result"]["serverInfo"]["name"], "sshmcp-server");
        assert!(body["result"]["protocolVersion"].is_string());
        assert!(body["result"]["capabilities"]["tools"].is_object());
        let session = session.expect("initialize must return a session id");

        let (status, _, _) = self
            .post(
                Some(&session),
                &json!({"jsonrpc":"2.0","method":"notifications/initialized"}),
            )
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        session
    }

    async fn call(&self, session: &str, tool: &str, arguments: Value) -> Value {
        let (status, _, body) = self
            .post(
                Some(session),
                &json!({
                    "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                    "params": { "name": tool, "arguments": arguments }
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["result"].clone()
    }

    async fn delete(&self, session: &str) -> StatusCode {
        let request = Request::builder()
            .method("DELETE")
            .uri("/")
            .header("authorization", format!("Bearer {TOKEN}"))
            .header(SESSION_HEADER, session)
            .body(Body::empty())
            .unwrap();
        self.send(request).await.0
    }
}

/// The last JSON-RPC message carried in an SSE body.
fn last_event(body: &str) -> Value {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<Value>(data.trim()).ok())
        .filter(|message| message.get("jsonrpc").is_some())
        .next_back()
        .unwrap_or(Value::Null)
}

#[tokio::test]
async fn unauthenticated_post_never_reaches_the_transport() {
    let harness = Harness::new(ScriptedTransport::echoing(), CommandPolicy::default());
    let resp = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/?token=wrong")
                .body(Body::from(
                    json!({"jsonrpc":"2.0","id":1,"method":"initialize"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(harness.transport.call_count(), 0);
}

#[tokio::test]
async fn query_token_authenticates_when_header_is_absent() {
    let harness = Harness::new(ScriptedTransport::echoing(), CommandPolicy::default());
    let resp = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/?token={TOKEN}"))
                .header("content-type", "application/json")
                .header("accept", "application/json, text/event-stream")
                .body(Body::from(
                    json!({
                        "jsonrpc": "2.0", "id": 1, "method": "initialize",
                        "params": {
                            "protocolVersion": "2025-06-18",
                            "capabilities": {},
                            "clientInfo": { "name": "it", "version": "0.0.1" }
                        }
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key(SESSION_HEADER));
}

#[tokio::test]
async fn request_before_initialize_is_rejected() {
    let harness = Harness::new(ScriptedTransport::echoing(), CommandPolicy::default());
    let (status, session, _) = harness
        .post(
            None,
            &json!({
                "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                "params": { "name": "ssh_exec_command", "arguments": { "command": "uptime" } }
            }),
        )
        .await;
    assert!(status.is_client_error(), "got {status}");
    assert!(session.is_none());
    assert_eq!(harness.transport.call_count(), 0);
}

#[tokio::test]
async fn unknown_session_is_invalid() {
    let harness = Harness::new(ScriptedTransport::echoing(), CommandPolicy::default());
    let (status, _, body) = harness
        .post(
            Some("not-a-session"),
            &json!({"jsonrpc":"2.0","id":1,"method":"tools/list"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], -32000);
    assert_eq!(body["error"]["message"], "Invalid session");
}

#[tokio::test]
async fn full_session_lifecycle() {
    let (transport, _files) = in_memory_host();
    let harness = Harness::new(transport, CommandPolicy::default());
    let session = harness.initialize().await;

    let (_, _, list) = harness
        .post(Some(&session), &json!({"jsonrpc":"2.0","id":2,"method":"tools/list"}))
        .await;
    assert_eq!(list["result"]["tools"].as_array().unwrap().len(), 6);

    let written = harness
        .call(
            &session,
            "write_remote_file",
            json!({ "path": "/etc/motd", "content": "welcome\n" }),
        )
        .await;
    assert_eq!(written["isError"], false);

    let read = harness
        .call(&session, "read_remote_file", json!({ "path": "/etc/motd" }))
        .await;
    assert_eq!(read["structuredContent"]["content"], "welcome\n");
    assert_eq!(read["structuredContent"]["truncated"], false);

    assert!(harness.delete(&session).await.is_success());

    let (status, _, body) = harness
        .post(Some(&session), &json!({"jsonrpc":"2.0","id":3,"method":"ping"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Invalid session");
}

#[tokio::test]
async fn blocked_command_is_reported_without_running() {
    let harness = Harness::new(
        ScriptedTransport::echoing(),
        CommandPolicy::from_csv(Some("rm -rf,shutdown"), None),
    );
    let session = harness.initialize().await;
    let result = harness
        .call(&session, "ssh_exec_command", json!({ "command": "sudo rm -rf /" }))
        .await;
    assert_eq!(result["isError"], false);
    assert_eq!(result["structuredContent"]["blocked"], true);
    assert_eq!(harness.transport.call_count(), 0);
}

#[tokio::test]
async fn allow_list_gates_commands() {
    let harness = Harness::new(
        ScriptedTransport::echoing(),
        CommandPolicy::from_csv(None, Some("git,ls")),
    );
    let session = harness.initialize().await;
    let allowed = harness
        .call(&session, "ssh_exec_command", json!({ "command": "git status" }))
        .await;
    assert_eq!(allowed["structuredContent"]["result"]["exitCode"], 0);

    let denied = harness
        .call(&session, "ssh_exec_command", json!({ "command": "whoami" }))
        .await;
    assert_eq!(denied["structuredContent"]["reason"], "Command not in allowed list");
    assert_eq!(harness.transport.commands(), ["git status"]);
}

#[tokio::test]
async fn sequential_batch_stops_at_first_failure() {
    let transport = ScriptedTransport::new(|_, inv| {
        let code = i32::from(inv.command.contains("false"));
        Ok(sshmcp_common::CommandResult::new(inv.command.clone(), "", code))
    });
    let harness = Harness::new(transport, CommandPolicy::default());
    let session = harness.initialize().await;
    let result = harness
        .call(
            &session,
            "exec_batch",
            json!({ "commands": ["echo a", "false", "echo c"], "working_dir": "/srv" }),
        )
        .await;
    let batch = &result["structuredContent"];
    assert_eq!(batch["mode"], "sequential");
    assert_eq!(batch["entries"].as_array().unwrap().len(), 2);
    assert_eq!(batch["skipped"], 1);
    assert_eq!(batch["success"], false);
    assert_eq!(
        harness.transport.commands(),
        ["cd -- '/srv' && echo a", "cd -- '/srv' && false"]
    );
}

#[tokio::test]
async fn unknown_tool_is_an_error_result() {
    let harness = Harness::new(ScriptedTransport::echoing(), CommandPolicy::default());
    let session = harness.initialize().await;
    let result = harness.call(&session, "reboot_host", json!({})).await;
    assert_eq!(result["isError"], true);
    assert_eq!(result["content"][0]["text"], "Unknown tool: reboot_host");
}

#[tokio::test]
async fn edit_of_non_utf8_file_is_refused_over_the_wire() {
    let (transport, files) = in_memory_host();
    files
        .lock()
        .unwrap()
        .insert("/srv/latin1".to_string(), b"caf\xe9 KEY\n".to_vec());
    let harness = Harness::new(transport, CommandPolicy::default());
    let session = harness.initialize().await;
    let result = harness
        .call(
            &session,
            "edit_remote_file",
            json!({ "path": "/srv/latin1", "old_string": "KEY", "new_string": "VAL" }),
        )
        .await;
    assert_eq!(result["isError"], true);
    assert!(
        result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("not valid UTF-8")
    );
    assert_eq!(files.lock().unwrap()["/srv/latin1"], b"caf\xe9 KEY\n");
}
