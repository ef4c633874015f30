pub mod mock;
pub mod ssh;

use std::time::Duration;

use sshmcp_common::{CommandResult, RemoteTarget};

/// One command to run on a remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInvocation {
    /// Shell command string, interpreted by the remote user's shell.
    pub command: String,
    /// Bytes fed to the command's stdin, which is closed afterwards.
    pub stdin: Option<Vec<u8>>,
}

impl RemoteInvocation {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            stdin: None,
        }
    }

    #[must_use]
    pub fn with_stdin(mut self, stdin: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

/// The remote session could not run the command to completion.
///
/// A command that ran and exited non-zero is not a transport error; it is a
/// [`CommandResult`] with `success == false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The target is unusable before any connection is attempted.
    InvalidTarget(String),
    /// The local client program could not be started.
    Spawn(String),
    /// The remote session failed to establish or dropped mid-flight.
    Connection(String),
    /// The command did not finish within the configured bound.
    Timeout(Duration),
    Io(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTarget(msg) => write!(f, "invalid target: {msg}"),
            Self::Spawn(msg) => write!(f, "failed to start ssh client: {msg}"),
            Self::Connection(msg) => write!(f, "ssh connection failed: {msg}"),
            Self::Timeout(after) => {
                write!(f, "command timed out after {}s", after.as_secs())
            }
            Self::Io(msg) => write!(f, "i/o error: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Capability to run a single command on a remote host.
///
/// Implementations own one session per call; nothing is shared between
/// concurrent invocations.
#[async_trait::async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn run(
        &self,
        target: &RemoteTarget,
        invocation: &RemoteInvocation,
    ) -> Result<CommandResult, TransportError>;
}
