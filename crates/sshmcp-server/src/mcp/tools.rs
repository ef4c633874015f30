use rmcp::{
    handler::server::tool::schema_for_type,
    model::{CallToolResult, Content, Tool},
    schemars::{self, JsonSchema},
};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use sshmcp_common::TargetOverride;
use sshmcp_common::compose::ListOptions;

use crate::coordinator::{CommandRequest, CoordinatorError, ExecutionCoordinator, Outcome};

pub const EXEC_COMMAND: &str = "ssh_exec_command";
pub const WRITE_FILE: &str = "write_remote_file";
pub const READ_FILE: &str = "read_remote_file";
pub const EDIT_FILE: &str = "edit_remote_file";
pub const EXEC_BATCH: &str = "exec_batch";
pub const LIST_FILES: &str = "list_remote_files";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecParams {
    /// The shell command to execute
    pub command: String,
    /// Optional working directory
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Override SSH host (optional)
    #[serde(default)]
    pub ssh_host: Option<String>,
    /// Override SSH port (optional)
    #[serde(default)]
    pub ssh_port: Option<u16>,
    /// Override SSH username (optional)
    #[serde(default)]
    pub ssh_user: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteParams {
    /// Absolute path to the file
    pub path: String,
    /// File content, written byte for byte
    pub content: String,
    /// Octal permissions such as "644" or "0755" (optional)
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadParams {
    /// Absolute path to the file
    pub path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EditParams {
    /// Absolute path to the file
    pub path: String,
    /// Exact string to replace
    pub old_string: String,
    /// Replacement string
    pub new_string: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BatchParams {
    /// Commands to execute
    pub commands: Vec<String>,
    /// Execute commands in parallel (default: false)
    #[serde(default)]
    pub parallel: bool,
    /// Working directory for all commands
    #[serde(default)]
    pub working_dir: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListParams {
    /// Directory path to list
    pub path: String,
    /// Glob pattern such as "*.log" or "**/*.rs"
    #[serde(default)]
    pub pattern: Option<String>,
    /// Descend into subdirectories (default: false)
    #[serde(default)]
    pub recursive: bool,
    /// Ignore permission-denied and similar errors (default: false)
    #[serde(default)]
    pub skip_errors: bool,
}

/// The `tools/list` catalog.
pub fn catalog() -> Vec<Tool> {
    vec![
        Tool::new(
            EXEC_COMMAND,
            "Execute a shell command over SSH on the remote host",
            schema_for_type::<ExecParams>(),
        ),
        Tool::new(
            WRITE_FILE,
            "Write content to a file on the remote host, creating or overwriting it",
            schema_for_type::<WriteParams>(),
        ),
        Tool::new(
            READ_FILE,
            "Read a file from the remote host",
            schema_for_type::<ReadParams>(),
        ),
        Tool::new(
            EDIT_FILE,
            "Replace every exact occurrence of a string in a remote UTF-8 text file",
            schema_for_type::<EditParams>(),
        ),
        Tool::new(
            EXEC_BATCH,
            "Execute several commands sequentially (stopping at the first failure) or in parallel, with per-command results",
            schema_for_type::<BatchParams>(),
        ),
        Tool::new(
            LIST_FILES,
            "List regular files in a remote directory, optionally filtered by a glob",
            schema_for_type::<ListParams>(),
        ),
    ]
}

fn success(text: String, structured: Value) -> CallToolResult {
    let mut result = CallToolResult::success(vec![Content::text(text)]);
    result.structured_content = Some(structured);
    result
}

fn failure(text: String) -> CallToolResult {
    CallToolResult::error(vec![Content::text(text)])
}

/// Policy rejections are ordinary results, not tool errors.
fn blocked(reason: &str) -> CallToolResult {
    success(
        format!("Command blocked: {reason}"),
        json!({ "blocked": true, "reason": reason }),
    )
}

fn coordinator_failure(prefix: &str, err: &CoordinatorError) -> CallToolResult {
    failure(format!("{prefix}: {err}"))
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, CallToolResult> {
    serde_json::from_value(arguments)
        .map_err(|e| failure(format!("Invalid arguments for {tool}: {e}")))
}

/// Run the named tool. Every failure is reported inside the result.
pub async fn call_tool(
    coordinator: &ExecutionCoordinator,
    name: &str,
    arguments: Value,
) -> CallToolResult {
    let outcome = match name {
        EXEC_COMMAND => exec_command(coordinator, arguments).await,
        WRITE_FILE => write_file(coordinator, arguments).await,
        READ_FILE => read_file(coordinator, arguments).await,
        EDIT_FILE => edit_file(coordinator, arguments).await,
        EXEC_BATCH => exec_batch(coordinator, arguments).await,
        LIST_FILES => list_files(coordinator, arguments).await,
        other => {
            tracing::warn!(tool = %other, "unknown tool");
            return failure(format!("Unknown tool: {other}"));
        }
    };
    outcome.unwrap_or_else(|err| err)
}

async fn exec_command(
    coordinator: &ExecutionCoordinator,
    arguments: Value,
) -> Result<CallToolResult, CallToolResult> {
    let args: ExecParams = parse_args(EXEC_COMMAND, arguments)?;
    let request = CommandRequest {
        command: args.command,
        working_dir: args.working_dir.filter(|d| !d.is_empty()),
        target: TargetOverride {
            host: args.ssh_host,
            port: args.ssh_port,
            username: args.ssh_user,
        },
    };
    let report = match coordinator.execute_command(request).await {
        Ok(Outcome::Done(report)) => report,
        Ok(Outcome::Rejected { reason }) => return Ok(blocked(&reason)),
        Err(err) => return Err(coordinator_failure("SSH error", &err)),
    };

    let result = &report.result;
    let mut text = format!(
        "Command: {}\nWorking dir: {}\nHost: {}\nExit code: {}\n\nSTDOUT:\n{}\n\nSTDERR:\n{}\n\n{}",
        report.command,
        report.working_dir.as_deref().unwrap_or("(default)"),
        report.address,
        result.exit_code,
        or_empty(&result.stdout),
        or_empty(&result.stderr),
        if result.success { "Success" } else { "Failed" },
    );
    if result.truncated {
        text.push_str("\n(output truncated)");
    }
    Ok(success(
        text,
        json!({
            "command": report.command,
            "workingDir": report.working_dir,
            "host": report.address,
            "result": result,
        }),
    ))
}

async fn write_file(
    coordinator: &ExecutionCoordinator,
    arguments: Value,
) -> Result<CallToolResult, CallToolResult> {
    let args: WriteParams = parse_args(WRITE_FILE, arguments)?;
    let mode = args.mode.as_deref().filter(|m| !m.is_empty());
    match coordinator.write_file(&args.path, &args.content, mode).await {
        Ok(Outcome::Done(report)) => {
            let mut text = format!("File written: {}\nSize: {} bytes", report.path, report.bytes);
            if let Some(mode) = &report.mode {
                text.push_str(&format!("\nMode: {mode}"));
            }
            Ok(success(
                text,
                json!({ "path": report.path, "bytes": report.bytes, "mode": report.mode }),
            ))
        }
        Ok(Outcome::Rejected { reason }) => Ok(blocked(&reason)),
        Err(err) => Err(coordinator_failure("Failed to write file", &err)),
    }
}

async fn read_file(
    coordinator: &ExecutionCoordinator,
    arguments: Value,
) -> Result<CallToolResult, CallToolResult> {
    let args: ReadParams = parse_args(READ_FILE, arguments)?;
    match coordinator.read_file(&args.path).await {
        Ok(Outcome::Done(report)) => {
            let mut text = format!("File: {}\nSize: {} bytes", report.path, report.bytes);
            if report.truncated {
                text.push_str(" (truncated at the output limit)");
            }
            if report.lossy {
                text.push_str("\nNot valid UTF-8: invalid bytes shown as U+FFFD");
            }
            text.push_str(&format!("\n\n{}", report.content));
            Ok(success(
                text,
                json!({
                    "path": report.path,
                    "bytes": report.bytes,
                    "content": report.content,
                    "truncated": report.truncated,
                    "lossy": report.lossy,
                }),
            ))
        }
        Ok(Outcome::Rejected { reason }) => Ok(blocked(&reason)),
        Err(err) => Err(coordinator_failure("Failed to read file", &err)),
    }
}

async fn edit_file(
    coordinator: &ExecutionCoordinator,
    arguments: Value,
) -> Result<CallToolResult, CallToolResult> {
    let args: EditParams = parse_args(EDIT_FILE, arguments)?;
    match coordinator
        .edit_file(&args.path, &args.old_string, &args.new_string)
        .await
    {
        Ok(Outcome::Done(report)) => Ok(success(
            format!(
                "File edited: {}\nReplaced {} occurrence(s): {} -> {} chars\nSize: {} -> {} bytes",
                report.path,
                report.replacements,
                report.old_len,
                report.new_len,
                report.bytes_before,
                report.bytes_after
            ),
            json!({
                "path": report.path,
                "replacements": report.replacements,
                "oldLength": report.old_len,
                "newLength": report.new_len,
                "bytesBefore": report.bytes_before,
                "bytesAfter": report.bytes_after,
            }),
        )),
        Ok(Outcome::Rejected { reason }) => Ok(blocked(&reason)),
        Err(err) => Err(coordinator_failure("Failed to edit file", &err)),
    }
}

async fn exec_batch(
    coordinator: &ExecutionCoordinator,
    arguments: Value,
) -> Result<CallToolResult, CallToolResult> {
    let args: BatchParams = parse_args(EXEC_BATCH, arguments)?;
    let working_dir = args.working_dir.filter(|d| !d.is_empty());
    match coordinator
        .execute_batch(args.commands, args.parallel, working_dir)
        .await
    {
        Ok(Outcome::Done(batch)) => {
            let structured =
                serde_json::to_value(&batch).map_err(|e| failure(format!("Error: {e}")))?;
            let pretty = serde_json::to_string_pretty(&batch.entries)
                .map_err(|e| failure(format!("Error: {e}")))?;
            let mut text = format!(
                "Batch executed ({}): {} ran, {} failed",
                batch.mode.as_str(),
                batch.entries.len(),
                batch.failed_count()
            );
            if batch.skipped > 0 {
                text.push_str(&format!(", {} skipped", batch.skipped));
            }
            text.push_str(&format!("\nResults:\n{pretty}"));
            Ok(success(text, structured))
        }
        Ok(Outcome::Rejected { reason }) => Ok(blocked(&reason)),
        Err(err) => Err(coordinator_failure("Error", &err)),
    }
}

async fn list_files(
    coordinator: &ExecutionCoordinator,
    arguments: Value,
) -> Result<CallToolResult, CallToolResult> {
    let args: ListParams = parse_args(LIST_FILES, arguments)?;
    let options = ListOptions {
        pattern: args.pattern.as_deref().filter(|p| !p.is_empty()),
        recursive: args.recursive,
        skip_errors: args.skip_errors,
    };
    match coordinator.list_files(&args.path, &options).await {
        Ok(Outcome::Done(report)) => Ok(success(
            format!(
                "Directory: {}\nFound: {} files\n\n{}",
                report.path,
                report.files.len(),
                report.files.join("\n")
            ),
            json!({ "path": report.path, "count": report.files.len(), "files": report.files }),
        )),
        Ok(Outcome::Rejected { reason }) => Ok(blocked(&reason)),
        Err(err) => Err(coordinator_failure("Failed to list files", &err)),
    }
}

fn or_empty(s: &str) -> &str {
    if s.is_empty() { "(empty)" } else { s }
}
