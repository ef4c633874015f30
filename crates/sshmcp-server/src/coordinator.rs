use std::sync::Arc;

use sshmcp_common::compose::{self, ComposeError, ListOptions};
use sshmcp_common::{
    BatchEntry, BatchMode, BatchResult, CommandPolicy, CommandResult, RemoteTarget, TargetOverride,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::executor::{RemoteInvocation, RemoteTransport, TransportError};
use crate::session::SessionRegistry;

/// Result of an operation that passed or failed the command policy.
///
/// A policy rejection is an ordinary outcome, not an error: callers render it
/// as a normal response carrying the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Rejected { reason: String },
    Done(T),
}

/// Operation failures other than policy rejections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    InvalidArgument(String),
    Transport(TransportError),
    /// A file operation's remote command exited non-zero.
    Remote { exit_code: i32, stderr: String },
}

impl std::fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Transport(err) => write!(f, "{err}"),
            Self::Remote { exit_code, stderr } => {
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    write!(f, "remote command exited with status {exit_code}")
                } else {
                    write!(f, "{stderr} (exit status {exit_code})")
                }
            }
        }
    }
}

impl std::error::Error for CoordinatorError {}

impl From<TransportError> for CoordinatorError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

impl From<ComposeError> for CoordinatorError {
    fn from(err: ComposeError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

/// A single command execution request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: String,
    pub working_dir: Option<String>,
    pub target: TargetOverride,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecReport {
    pub command: String,
    pub working_dir: Option<String>,
    pub address: String,
    pub result: CommandResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub path: String,
    pub bytes: usize,
    pub mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReport {
    pub path: String,
    pub content: String,
    pub bytes: usize,
    /// The file is larger than the output cap; `content` is its prefix.
    pub truncated: bool,
    /// The file is not valid UTF-8; invalid bytes were replaced.
    pub lossy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditReport {
    pub path: String,
    pub replacements: usize,
    pub old_len: usize,
    pub new_len: usize,
    pub bytes_before: usize,
    pub bytes_after: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListReport {
    pub path: String,
    pub files: Vec<String>,
}

/// Entry point for every remote operation.
///
/// Applies the command policy, composes remote commands, and drives the
/// transport once per command. Owns the session registry for the MCP layer.
pub struct ExecutionCoordinator {
    policy: CommandPolicy,
    transport: Arc<dyn RemoteTransport>,
    default_target: RemoteTarget,
    max_parallel: usize,
    sessions: SessionRegistry,
}

impl ExecutionCoordinator {
    pub fn new(
        policy: CommandPolicy,
        transport: Arc<dyn RemoteTransport>,
        default_target: RemoteTarget,
        max_parallel: usize,
        sessions: SessionRegistry,
    ) -> Self {
        Self {
            policy,
            transport,
            default_target,
            max_parallel: max_parallel.max(1),
            sessions,
        }
    }

    pub const fn policy(&self) -> &CommandPolicy {
        &self.policy
    }

    pub const fn default_target(&self) -> &RemoteTarget {
        &self.default_target
    }

    pub const fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Run one caller-supplied command, after the full policy check.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Transport`] if the remote session fails.
    /// A non-zero exit is a successful [`ExecReport`] with `success == false`.
    pub async fn execute_command(
        &self,
        request: CommandRequest,
    ) -> Result<Outcome<ExecReport>, CoordinatorError> {
        let decision = self.policy.evaluate(&request.command);
        if !decision.allowed {
            let reason = decision.reason.unwrap_or_default();
            tracing::warn!(command = %request.command, %reason, "command blocked by policy");
            return Ok(Outcome::Rejected { reason });
        }

        let target = request.target.apply(&self.default_target);
        if !request.target.is_empty() {
            tracing::info!(address = %target.address(), user = %target.username, "target override");
        }
        let remote = compose::in_working_dir(request.working_dir.as_deref(), &request.command);
        tracing::info!(address = %target.address(), command = %request.command, "executing command");
        let result = self
            .transport
            .run(&target, &RemoteInvocation::new(remote))
            .await?;

        Ok(Outcome::Done(ExecReport {
            command: request.command,
            working_dir: request.working_dir,
            address: target.address(),
            result,
        }))
    }

    /// Overwrite `path` with `content`, byte for byte, optionally setting its mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the path or mode is invalid, the session fails or
    /// the remote write exits non-zero.
    pub async fn write_file(
        &self,
        path: &str,
        content: &str,
        mode: Option<&str>,
    ) -> Result<Outcome<WriteReport>, CoordinatorError> {
        let remote = compose::write_file(path, mode)?;
        if let Some(reason) = self.blocked(&remote) {
            return Ok(Outcome::Rejected { reason });
        }
        tracing::info!(%path, bytes = content.len(), "writing remote file");
        self.run_checked(RemoteInvocation::new(remote).with_stdin(content.as_bytes()))
            .await?;
        Ok(Outcome::Done(WriteReport {
            path: path.to_string(),
            bytes: content.len(),
            mode: mode.map(str::to_string),
        }))
    }

    /// # Errors
    ///
    /// Returns an error if the path is empty, the session fails or the file
    /// cannot be read.
    pub async fn read_file(&self, path: &str) -> Result<Outcome<ReadReport>, CoordinatorError> {
        let remote = compose::read_file(path)?;
        if let Some(reason) = self.blocked(&remote) {
            return Ok(Outcome::Rejected { reason });
        }
        tracing::info!(%path, "reading remote file");
        let result = self.run_checked(RemoteInvocation::new(remote)).await?;
        if result.truncated {
            tracing::warn!(%path, bytes = result.stdout.len(), "remote file read was truncated");
        }
        Ok(Outcome::Done(ReadReport {
            path: path.to_string(),
            bytes: result.stdout.len(),
            content: result.stdout,
            truncated: result.truncated,
            lossy: result.stdout_lossy,
        }))
    }

    /// Replace every occurrence of `old` with `new` in a remote text file.
    ///
    /// The file is read, rewritten in memory and written back. Nothing is
    /// written when `old` does not occur, when the read hit the output cap, or
    /// when the file is not valid UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::InvalidArgument`] if `old` is empty or not
    /// found, or the file cannot be edited as a whole text, and propagates
    /// read/write failures.
    pub async fn edit_file(
        &self,
        path: &str,
        old: &str,
        new: &str,
    ) -> Result<Outcome<EditReport>, CoordinatorError> {
        if old.is_empty() {
            return Err(CoordinatorError::InvalidArgument(
                "old_string must not be empty".to_string(),
            ));
        }
        let original = match self.read_file(path).await? {
            Outcome::Rejected { reason } => return Ok(Outcome::Rejected { reason }),
            Outcome::Done(report) if report.truncated => {
                return Err(CoordinatorError::InvalidArgument(format!(
                    "{path} is larger than the output limit and cannot be edited"
                )));
            }
            Outcome::Done(report) if report.lossy => {
                return Err(CoordinatorError::InvalidArgument(format!(
                    "{path} is not valid UTF-8 text and cannot be edited"
                )));
            }
            Outcome::Done(report) => report.content,
        };
        let replacements = original.matches(old).count();
        if replacements == 0 {
            return Err(CoordinatorError::InvalidArgument(format!(
                "old_string not found in {path}"
            )));
        }
        let updated = original.replace(old, new);
        if let Outcome::Rejected { reason } = self.write_file(path, &updated, None).await? {
            return Ok(Outcome::Rejected { reason });
        }
        Ok(Outcome::Done(EditReport {
            path: path.to_string(),
            replacements,
            old_len: old.chars().count(),
            new_len: new.chars().count(),
            bytes_before: original.len(),
            bytes_after: updated.len(),
        }))
    }

    /// Run several commands against the default target.
    ///
    /// Every command is checked against the policy before any of them runs.
    /// Sequential mode stops after the first failed entry; parallel mode runs
    /// everything and reports each outcome independently. Entries are always
    /// in request order.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::InvalidArgument`] for an empty batch.
    /// Transport failures are reported per entry, not as an error.
    pub async fn execute_batch(
        &self,
        commands: Vec<String>,
        parallel: bool,
        working_dir: Option<String>,
    ) -> Result<Outcome<BatchResult>, CoordinatorError> {
        if commands.is_empty() {
            return Err(CoordinatorError::InvalidArgument(
                "commands must not be empty".to_string(),
            ));
        }
        for command in &commands {
            let decision = self.policy.evaluate(command);
            if !decision.allowed {
                let reason = decision.reason.unwrap_or_default();
                tracing::warn!(%command, %reason, "batch blocked by policy");
                return Ok(Outcome::Rejected {
                    reason: format!("{reason} (command: {command})"),
                });
            }
        }

        let mode = BatchMode::from_parallel(parallel);
        tracing::info!(mode = mode.as_str(), count = commands.len(), "executing batch");
        let requested = commands.len();
        let entries = match mode {
            BatchMode::Sequential => self.run_sequential(commands, working_dir.as_deref()).await,
            BatchMode::Parallel => self.run_parallel(commands, working_dir.as_deref()).await,
        };
        let result = BatchResult::new(mode, entries, requested);
        tracing::info!(
            mode = mode.as_str(),
            ran = result.entries.len(),
            failed = result.failed_count(),
            skipped = result.skipped,
            "batch finished"
        );
        Ok(Outcome::Done(result))
    }

    /// # Errors
    ///
    /// Returns an error if the path is empty, the session fails, or `find`
    /// exits non-zero while `skip_errors` is off.
    pub async fn list_files(
        &self,
        path: &str,
        options: &ListOptions<'_>,
    ) -> Result<Outcome<ListReport>, CoordinatorError> {
        let remote = compose::list_files(path, options)?;
        if let Some(reason) = self.blocked(&remote) {
            return Ok(Outcome::Rejected { reason });
        }
        tracing::info!(%path, recursive = options.recursive, "listing remote files");
        let result = self
            .transport
            .run(&self.default_target, &RemoteInvocation::new(remote))
            .await?;
        // With skip_errors, find still exits non-zero on unreadable
        // subdirectories; whatever it listed is the answer.
        if !result.success && !options.skip_errors {
            return Err(CoordinatorError::Remote {
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }
        let files = result
            .stdout
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Outcome::Done(ListReport {
            path: path.to_string(),
            files,
        }))
    }

    /// Run a trivial command against the default target.
    ///
    /// # Errors
    ///
    /// Returns the transport error, or [`CoordinatorError::Remote`] if the
    /// test command exits non-zero.
    pub async fn test_connection(&self) -> Result<(), CoordinatorError> {
        self.run_checked(RemoteInvocation::new("echo \"connection test\""))
            .await
            .map(|_| ())
    }

    fn blocked(&self, remote: &str) -> Option<String> {
        let decision = self.policy.evaluate_blocked_only(remote);
        if decision.allowed {
            return None;
        }
        tracing::warn!(command = %remote, "file operation blocked by policy");
        decision.reason
    }

    async fn run_checked(
        &self,
        invocation: RemoteInvocation,
    ) -> Result<CommandResult, CoordinatorError> {
        let result = self
            .transport
            .run(&self.default_target, &invocation)
            .await?;
        if result.success {
            Ok(result)
        } else {
            Err(CoordinatorError::Remote {
                exit_code: result.exit_code,
                stderr: result.stderr,
            })
        }
    }

    async fn run_sequential(
        &self,
        commands: Vec<String>,
        working_dir: Option<&str>,
    ) -> Vec<BatchEntry> {
        let mut entries = Vec::with_capacity(commands.len());
        for command in commands {
            let invocation = RemoteInvocation::new(compose::in_working_dir(working_dir, &command));
            let outcome = self.transport.run(&self.default_target, &invocation).await;
            let entry = batch_entry(command, outcome);
            let failed = !entry.success;
            entries.push(entry);
            if failed {
                break;
            }
        }
        entries
    }

    async fn run_parallel(
        &self,
        commands: Vec<String>,
        working_dir: Option<&str>,
    ) -> Vec<BatchEntry> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks = JoinSet::new();
        for (index, command) in commands.iter().enumerate() {
            let transport = Arc::clone(&self.transport);
            let target = self.default_target.clone();
            let semaphore = Arc::clone(&semaphore);
            let invocation = RemoteInvocation::new(compose::in_working_dir(working_dir, command));
            tasks.spawn(async move {
                // The semaphore is never closed, so acquisition cannot fail.
                let _permit = semaphore.acquire_owned().await;
                (index, transport.run(&target, &invocation).await)
            });
        }

        let mut slots: Vec<Option<BatchEntry>> = vec![None; commands.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    if let (Some(slot), Some(command)) = (slots.get_mut(index), commands.get(index))
                    {
                        *slot = Some(batch_entry(command.clone(), outcome));
                    }
                }
                Err(e) => tracing::error!("batch task failed: {e}"),
            }
        }

        slots
            .into_iter()
            .zip(commands)
            .map(|(slot, command)| {
                slot.unwrap_or_else(|| BatchEntry::failed(command, "batch task did not complete"))
            })
            .collect()
    }
}

fn batch_entry(command: String, outcome: Result<CommandResult, TransportError>) -> BatchEntry {
    match outcome {
        Ok(result) => BatchEntry::completed(command, result),
        Err(err) => {
            tracing::warn!(%command, "batch command failed: {err}");
            BatchEntry::failed(command, err.to_string())
        }
    }
}
