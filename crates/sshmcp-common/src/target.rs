use std::path::PathBuf;

use serde::Deserialize;

/// Credentials used to authenticate against a remote host.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthMaterial {
    pub key_path: Option<PathBuf>,
    pub password: Option<String>,
}

// Custom Debug masks the password so targets are safe to log.
impl std::fmt::Debug for AuthMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMaterial")
            .field("key_path", &self.key_path)
            .field("password", &self.password.as_deref().map(|_| "<redacted>"))
            .finish()
    }
}

/// The host/credential tuple a command is executed against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: AuthMaterial,
}

impl RemoteTarget {
    /// `host:port`, for display.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Per-request overrides layered on top of the configured default target.
/// Authentication material is never overridable from a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TargetOverride {
    #[serde(default, rename = "ssh_host")]
    pub host: Option<String>,
    #[serde(default, rename = "ssh_port")]
    pub port: Option<u16>,
    #[serde(default, rename = "ssh_user")]
    pub username: Option<String>,
}

impl TargetOverride {
    pub const fn is_empty(&self) -> bool {
        self.host.is_none() && self.port.is_none() && self.username.is_none()
    }

    /// Resolve the effective target. Empty strings fall back to the default.
    pub fn apply(&self, default: &RemoteTarget) -> RemoteTarget {
        RemoteTarget {
            host: non_empty(self.host.as_deref()).unwrap_or(&default.host).to_string(),
            port: self.port.filter(|p| *p != 0).unwrap_or(default.port),
            username: non_empty(self.username.as_deref())
                .unwrap_or(&default.username)
                .to_string(),
            auth: default.auth.clone(),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
