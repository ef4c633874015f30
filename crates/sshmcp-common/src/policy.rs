use serde::Serialize;

/// Outcome of evaluating a command against a [`CommandPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PolicyDecision {
    pub const fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Allow/block pattern lists gating which commands may run.
///
/// Matching is plain substring matching on the raw command text, not shell
/// tokenization: `"rm -rf"` blocks `"sudo rm -rf /tmp/x"` and an allowed
/// `"git"` admits `"cd repo && git status"`. The block list is always
/// consulted first and wins over the allow list. An empty allow list admits
/// every command the block list lets through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandPolicy {
    blocked: Vec<String>,
    allowed: Vec<String>,
}

impl CommandPolicy {
    /// Build a policy from explicit lists. Patterns are trimmed and empty
    /// patterns dropped, since an empty pattern is a substring of everything.
    pub fn new<B, A>(blocked: B, allowed: A) -> Self
    where
        B: IntoIterator,
        B::Item: AsRef<str>,
        A: IntoIterator,
        A::Item: AsRef<str>,
    {
        Self {
            blocked: normalize(blocked),
            allowed: normalize(allowed),
        }
    }

    /// Build a policy from comma-separated lists, as found in
    /// `BLOCKED_COMMANDS` / `ALLOWED_COMMANDS`.
    pub fn from_csv(blocked: Option<&str>, allowed: Option<&str>) -> Self {
        Self::new(
            blocked.map(split_csv).unwrap_or_default(),
            allowed.map(split_csv).unwrap_or_default(),
        )
    }

    pub fn blocked(&self) -> &[String] {
        &self.blocked
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    /// Classify `command` as allowed or blocked.
    pub fn evaluate(&self, command: &str) -> PolicyDecision {
        if let Some(decision) = self.check_blocked(command) {
            return decision;
        }
        if self.allowed.is_empty() {
            return PolicyDecision::allow();
        }
        let admitted = self
            .allowed
            .iter()
            .any(|p| command.starts_with(p.as_str()) || command.contains(p.as_str()));
        if admitted {
            PolicyDecision::allow()
        } else {
            PolicyDecision::deny("Command not in allowed list")
        }
    }

    /// Apply only the block list. Used for internally composed commands
    /// (file operations) that the allow list, which names command prefixes,
    /// does not describe.
    pub fn evaluate_blocked_only(&self, command: &str) -> PolicyDecision {
        self.check_blocked(command)
            .unwrap_or_else(PolicyDecision::allow)
    }

    fn check_blocked(&self, command: &str) -> Option<PolicyDecision> {
        self.blocked
            .iter()
            .find(|p| command.contains(p.as_str()))
            .map(|p| PolicyDecision::deny(format!("Command contains blocked pattern: {p}")))
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',').map(str::to_string).collect()
}

fn normalize<I>(patterns: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| p.as_ref().trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}
