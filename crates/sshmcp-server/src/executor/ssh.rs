use std::process::Stdio;
use std::time::Duration;

use sshmcp_common::{CommandResult, RemoteTarget};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};

use super::{RemoteInvocation, RemoteTransport, TransportError};

/// Status the OpenSSH client exits with when the session itself fails
/// (resolution, connection, authentication). A remote command may exit with
/// it too, so it only counts as a session failure alongside a client
/// diagnostic on stderr.
const SSH_FAILURE_STATUS: i32 = 255;

/// Line prefixes the OpenSSH client writes when it never reached, or lost,
/// the remote command.
const CLIENT_DIAGNOSTIC_PREFIXES: [&str; 4] = [
    "ssh: ",
    "client_loop: ",
    "kex_exchange_identification: ",
    "Connection closed by ",
];

/// Client diagnostics that carry a user or host name before them.
const CLIENT_DIAGNOSTIC_MARKERS: [&str; 4] = [
    "Permission denied (",
    "Host key verification failed",
    "Connection timed out during banner exchange",
    " closed by remote host",
];

const READ_CHUNK: usize = 8192;

/// Knobs for [`SshTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    pub ssh_binary: String,
    pub sshpass_binary: String,
    pub connect_timeout_secs: u64,
    pub strict_host_key_checking: String,
    /// `None` lets a command run forever.
    pub command_timeout: Option<Duration>,
    /// Per-stream cap; output beyond it is drained and discarded.
    pub max_output_bytes: usize,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            ssh_binary: "ssh".to_string(),
            sshpass_binary: "sshpass".to_string(),
            connect_timeout_secs: 10,
            strict_host_key_checking: "accept-new".to_string(),
            command_timeout: Some(Duration::from_secs(300)),
            max_output_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Program and argument vector for one `ssh` invocation.
///
/// No local shell is involved: the remote command string is passed as a
/// single argument after `--` and the destination.
pub struct SshCommandLine {
    pub program: String,
    pub args: Vec<String>,
    /// Exported as `SSHPASS` for `sshpass -e`; never placed on argv.
    pub password: Option<String>,
}

/// Runs each command in its own `ssh` client process.
pub struct SshTransport {
    options: SshOptions,
}

impl SshTransport {
    pub const fn new(options: SshOptions) -> Self {
        Self { options }
    }

    /// Build the client invocation for `command` on `target`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidTarget`] if the host or user name
    /// could be mistaken for an option or contains whitespace.
    pub fn command_line(
        &self,
        target: &RemoteTarget,
        command: &str,
    ) -> Result<SshCommandLine, TransportError> {
        validate_target(target)?;

        let use_password = target.auth.password.is_some() && target.auth.key_path.is_none();
        let mut args: Vec<String> = Vec::new();
        let program = if use_password {
            args.push("-e".to_string());
            args.push(self.options.ssh_binary.clone());
            self.options.sshpass_binary.clone()
        } else {
            self.options.ssh_binary.clone()
        };

        args.push("-T".to_string());
        if use_password {
            args.extend(["-o".to_string(), "NumberOfPasswordPrompts=1".to_string()]);
        } else {
            args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
        }
        args.extend([
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout_secs),
            "-o".to_string(),
            format!(
                "StrictHostKeyChecking={}",
                self.options.strict_host_key_checking
            ),
            "-p".to_string(),
            target.port.to_string(),
            "-l".to_string(),
            target.username.clone(),
        ]);
        if let Some(key) = &target.auth.key_path {
            args.extend([
                "-i".to_string(),
                key.display().to_string(),
                "-o".to_string(),
                "IdentitiesOnly=yes".to_string(),
            ]);
        }
        args.extend([
            "--".to_string(),
            target.host.clone(),
            command.to_string(),
        ]);

        Ok(SshCommandLine {
            program,
            args,
            password: if use_password {
                target.auth.password.clone()
            } else {
                None
            },
        })
    }

    async fn run_to_completion(
        &self,
        line: SshCommandLine,
        stdin: Option<Vec<u8>>,
    ) -> Result<CommandResult, TransportError> {
        let mut cmd = Command::new(&line.program);
        cmd.args(&line.args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future on timeout kills the client and with it the session.
            .kill_on_drop(true);
        if let Some(password) = &line.password {
            cmd.env("SSHPASS", password);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{}: {e}", line.program)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Io("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::Io("stderr not captured".to_string()))?;
        let stdin_pipe = child.stdin.take();

        let limit = self.options.max_output_bytes;
        let (status, (out, out_truncated), (err, err_truncated), ()) = tokio::try_join!(
            child.wait(),
            read_capped(stdout, limit),
            read_capped(stderr, limit),
            feed_stdin(stdin_pipe, stdin),
        )?;

        let result = CommandResult::from_bytes(out, err, exit_code_from_status(status))
            .with_truncated(out_truncated || err_truncated);
        if is_session_failure(&result) {
            return Err(TransportError::Connection(result.stderr.trim().to_string()));
        }
        Ok(result)
    }
}

#[async_trait::async_trait]
impl RemoteTransport for SshTransport {
    async fn run(
        &self,
        target: &RemoteTarget,
        invocation: &RemoteInvocation,
    ) -> Result<CommandResult, TransportError> {
        let line = self.command_line(target, &invocation.command)?;
        tracing::debug!(
            host = %target.host,
            port = target.port,
            user = %target.username,
            has_key = target.auth.key_path.is_some(),
            has_password = target.auth.password.is_some(),
            "opening ssh session"
        );

        let run = self.run_to_completion(line, invocation.stdin.clone());
        match self.options.command_timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| TransportError::Timeout(limit))?,
            None => run.await,
        }
    }
}

fn validate_target(target: &RemoteTarget) -> Result<(), TransportError> {
    for (field, value) in [("host", &target.host), ("user", &target.username)] {
        if value.is_empty() {
            return Err(TransportError::InvalidTarget(format!("{field} is empty")));
        }
        if value.starts_with('-') {
            return Err(TransportError::InvalidTarget(format!(
                "{field} must not start with '-'"
            )));
        }
        if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(TransportError::InvalidTarget(format!(
                "{field} contains whitespace or control characters"
            )));
        }
    }
    Ok(())
}

/// Read a stream to EOF, keeping at most `limit` bytes. Reading continues
/// past the limit so the remote side never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
) -> std::io::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut truncated = false;
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(buf.len());
        if n > room {
            truncated = true;
        }
        buf.extend_from_slice(&chunk[..n.min(room)]);
    }
    Ok((buf, truncated))
}

async fn feed_stdin(pipe: Option<ChildStdin>, data: Option<Vec<u8>>) -> std::io::Result<()> {
    let (Some(mut pipe), Some(data)) = (pipe, data) else {
        return Ok(());
    };
    match pipe.write_all(&data).await {
        // The remote command may exit without reading its input.
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(e),
        Ok(()) => pipe.shutdown().await,
    }
}

/// Extract an exit code from a process status, mapping signals to 128+N on Unix.
fn exit_code_from_status(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status
            .code()
            .unwrap_or_else(|| status.signal().map_or(1, |s| 128 + s))
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(1)
    }
}

/// Exit 255 with an ssh client diagnostic on stderr. A bare 255 from the
/// remote command stays an ordinary result with its output intact.
fn is_session_failure(result: &CommandResult) -> bool {
    result.exit_code == SSH_FAILURE_STATUS
        && result.stderr.lines().any(|line| {
            CLIENT_DIAGNOSTIC_PREFIXES
                .iter()
                .any(|prefix| line.starts_with(prefix))
                || CLIENT_DIAGNOSTIC_MARKERS
                    .iter()
                    .any(|marker| line.contains(marker))
        })
}
