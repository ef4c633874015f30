use serde::Serialize;

/// Captured outcome of one remote invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub success: bool,
    /// Set when either stream exceeded the configured output cap and the
    /// excess was discarded.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    /// Set when stdout was not valid UTF-8 and invalid sequences were
    /// replaced with U+FFFD.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stdout_lossy: bool,
}

impl CommandResult {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            success: exit_code == 0,
            truncated: false,
            stdout_lossy: false,
        }
    }

    /// Decode raw process output. Invalid UTF-8 is replaced, and flagged for
    /// stdout so callers that write the text back can refuse.
    pub fn from_bytes(stdout: Vec<u8>, stderr: Vec<u8>, exit_code: i32) -> Self {
        let (stdout, stdout_lossy) = decode(stdout);
        let (stderr, _) = decode(stderr);
        let mut result = Self::new(stdout, stderr, exit_code);
        result.stdout_lossy = stdout_lossy;
        result
    }

    #[must_use]
    pub const fn with_truncated(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }
}

fn decode(bytes: Vec<u8>) -> (String, bool) {
    match String::from_utf8(bytes) {
        Ok(text) => (text, false),
        Err(e) => (String::from_utf8_lossy(e.as_bytes()).into_owned(), true),
    }
}

/// How a batch of commands is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchMode {
    /// One at a time, in order, stopping after the first failure.
    Sequential,
    /// All at once; every command runs regardless of the others.
    Parallel,
}

impl BatchMode {
    pub const fn from_parallel(parallel: bool) -> Self {
        if parallel {
            Self::Parallel
        } else {
            Self::Sequential
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        }
    }
}

/// One command of a batch, tagged with its own outcome.
///
/// `exit_code` is absent when the command never produced one because the
/// transport failed; `error` then carries the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchEntry {
    pub fn completed(command: impl Into<String>, result: CommandResult) -> Self {
        Self {
            command: command.into(),
            exit_code: Some(result.exit_code),
            stdout: result.stdout,
            stderr: result.stderr,
            success: result.success,
            error: None,
        }
    }

    pub fn failed(command: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Ordered per-command results of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub mode: BatchMode,
    /// In request order, never completion order.
    pub entries: Vec<BatchEntry>,
    /// Commands never attempted because an earlier one failed (sequential only).
    pub skipped: usize,
    /// Every requested command ran and succeeded.
    pub success: bool,
}

impl BatchResult {
    pub fn new(mode: BatchMode, entries: Vec<BatchEntry>, requested: usize) -> Self {
        let skipped = requested.saturating_sub(entries.len());
        let success = skipped == 0 && entries.iter().all(|e| e.success);
        Self {
            mode,
            entries,
            skipped,
            success,
        }
    }

    pub fn failed_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.success).count()
    }
}
