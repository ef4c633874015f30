use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sshmcp_common::{AuthMaterial, CommandPolicy, RemoteTarget};

use crate::executor::ssh::SshOptions;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_MAX_PARALLEL: usize = 8;
const DEFAULT_SESSION_IDLE_SECS: u64 = 3600;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

pub struct Config {
    pub host: String,
    pub port: u16,
    /// Shared secret every authenticated request must present. `None` makes
    /// every authenticated endpoint answer with a configuration error.
    pub bearer_token: Option<String>,
    pub ssh_host: String,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub ssh_private_key_path: Option<PathBuf>,
    pub ssh_password: Option<String>,
    pub allowed_commands: Option<String>,
    pub blocked_commands: Option<String>,
    /// `None` disables the per-command timeout (`COMMAND_TIMEOUT_SECS=0`).
    pub command_timeout: Option<Duration>,
    pub max_output_bytes: usize,
    pub max_parallel: usize,
    pub session_idle_timeout: Duration,
    pub ssh_connect_timeout_secs: u64,
    pub ssh_strict_host_key_checking: String,
    pub ssh_binary: String,
    pub sshpass_binary: String,
}

// Custom Debug masks secrets so the struct is safe to log.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field(
                "bearer_token",
                &self.bearer_token.as_deref().map(|_| "<redacted>"),
            )
            .field("ssh_host", &self.ssh_host)
            .field("ssh_port", &self.ssh_port)
            .field("ssh_user", &self.ssh_user)
            .field("ssh_private_key_path", &self.ssh_private_key_path)
            .field(
                "ssh_password",
                &self.ssh_password.as_deref().map(|_| "<redacted>"),
            )
            .field("allowed_commands", &self.allowed_commands)
            .field("blocked_commands", &self.blocked_commands)
            .field("command_timeout", &self.command_timeout)
            .field("max_output_bytes", &self.max_output_bytes)
            .field("max_parallel", &self.max_parallel)
            .field("session_idle_timeout", &self.session_idle_timeout)
            .field("ssh_connect_timeout_secs", &self.ssh_connect_timeout_secs)
            .field(
                "ssh_strict_host_key_checking",
                &self.ssh_strict_host_key_checking,
            )
            .field("ssh_binary", &self.ssh_binary)
            .field("sshpass_binary", &self.sshpass_binary)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Self {
        let port = match parse_var::<u16>("PORT", DEFAULT_PORT) {
            0 => {
                tracing::warn!("PORT must be 1-65535, defaulting to {DEFAULT_PORT}");
                DEFAULT_PORT
            }
            port => port,
        };
        let command_timeout_secs = parse_var("COMMAND_TIMEOUT_SECS", DEFAULT_COMMAND_TIMEOUT_SECS);
        let max_parallel = match parse_var("MAX_PARALLEL", DEFAULT_MAX_PARALLEL) {
            0 => {
                tracing::warn!("MAX_PARALLEL must be at least 1, defaulting to {DEFAULT_MAX_PARALLEL}");
                DEFAULT_MAX_PARALLEL
            }
            n => n,
        };
        let ssh_user = non_empty_var("DEFAULT_SSH_USER")
            .or_else(|| non_empty_var("USER"))
            .unwrap_or_else(|| "root".to_string());

        Self {
            host: non_empty_var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            bearer_token: non_empty_var("BEARER_TOKEN"),
            ssh_host: non_empty_var("DEFAULT_SSH_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            ssh_port: parse_var("DEFAULT_SSH_PORT", 22),
            ssh_user,
            ssh_private_key_path: non_empty_var("SSH_PRIVATE_KEY_PATH").map(PathBuf::from),
            ssh_password: non_empty_var("DEFAULT_SSH_PASSWORD"),
            allowed_commands: std::env::var("ALLOWED_COMMANDS").ok(),
            blocked_commands: std::env::var("BLOCKED_COMMANDS").ok(),
            command_timeout: (command_timeout_secs > 0)
                .then(|| Duration::from_secs(command_timeout_secs)),
            max_output_bytes: parse_var("MAX_OUTPUT_BYTES", DEFAULT_MAX_OUTPUT_BYTES),
            max_parallel,
            session_idle_timeout: Duration::from_secs(parse_var(
                "SESSION_IDLE_TIMEOUT_SECS",
                DEFAULT_SESSION_IDLE_SECS,
            )),
            ssh_connect_timeout_secs: parse_var(
                "SSH_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            ),
            ssh_strict_host_key_checking: non_empty_var("SSH_STRICT_HOST_KEY_CHECKING")
                .unwrap_or_else(|| "accept-new".to_string()),
            ssh_binary: non_empty_var("SSH_BINARY").unwrap_or_else(|| "ssh".to_string()),
            sshpass_binary: non_empty_var("SSHPASS_BINARY")
                .unwrap_or_else(|| "sshpass".to_string()),
        }
    }

    /// The target every operation runs against unless overridden.
    pub fn default_target(&self) -> RemoteTarget {
        RemoteTarget {
            host: self.ssh_host.clone(),
            port: self.ssh_port,
            username: self.ssh_user.clone(),
            auth: AuthMaterial {
                key_path: self.ssh_private_key_path.clone(),
                password: self.ssh_password.clone(),
            },
        }
    }

    pub fn policy(&self) -> CommandPolicy {
        CommandPolicy::from_csv(
            self.blocked_commands.as_deref(),
            self.allowed_commands.as_deref(),
        )
    }

    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            ssh_binary: self.ssh_binary.clone(),
            sshpass_binary: self.sshpass_binary.clone(),
            connect_timeout_secs: self.ssh_connect_timeout_secs,
            strict_host_key_checking: self.ssh_strict_host_key_checking.clone(),
            command_timeout: self.command_timeout,
            max_output_bytes: self.max_output_bytes,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// Warn when a variable is set but unparsable so misconfiguration is visible.
fn parse_var<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("{name} env var {raw:?} is not valid, defaulting to {default}");
            default
        }),
        Err(_) => default,
    }
}
