//! Remote shell command composition.
//!
//! The remote side only accepts a command string, so every value that comes
//! from a request (paths, directories, patterns, modes) is passed through
//! [`shell_quote`] before it is interpolated. File contents never appear in a
//! command string at all; they travel on the channel's stdin.

use crate::quote::shell_quote;

/// A composed command was rejected before reaching the remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposeError {
    EmptyPath,
    InvalidMode(String),
}

impl std::fmt::Display for ComposeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPath => write!(f, "path must not be empty"),
            Self::InvalidMode(mode) => write!(
                f,
                "invalid file mode {mode:?}: expected 3 or 4 octal digits (e.g. 644)"
            ),
        }
    }
}

impl std::error::Error for ComposeError {}

/// Run `command` from inside `dir`.
pub fn in_working_dir(dir: Option<&str>, command: &str) -> String {
    match dir.filter(|d| !d.is_empty()) {
        Some(dir) if dir.starts_with('-') => {
            format!("cd -- {} && {command}", shell_quote(&format!("./{dir}")))
        }
        Some(dir) => format!("cd -- {} && {command}", shell_quote(dir)),
        None => command.to_string(),
    }
}

/// Overwrite `path` with whatever arrives on stdin, then optionally chmod it.
///
/// # Errors
///
/// Returns [`ComposeError`] if `path` is empty or `mode` is not 3–4 octal digits.
pub fn write_file(path: &str, mode: Option<&str>) -> Result<String, ComposeError> {
    let quoted = quoted_path(path)?;
    let mut command = format!("cat > {quoted}");
    if let Some(mode) = mode {
        validate_mode(mode)?;
        command.push_str(&format!(" && chmod {mode} -- {quoted}"));
    }
    Ok(command)
}

/// Print the contents of `path` to stdout.
///
/// # Errors
///
/// Returns [`ComposeError::EmptyPath`] if `path` is empty.
pub fn read_file(path: &str) -> Result<String, ComposeError> {
    Ok(format!("cat -- {}", quoted_path(path)?))
}

/// Options for [`list_files`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions<'a> {
    /// Glob matched against the file name, or against the whole path when it
    /// contains a `/` (so `**/*.rs` behaves as expected).
    pub pattern: Option<&'a str>,
    pub recursive: bool,
    /// Discard `find`'s stderr (permission denied and similar).
    pub skip_errors: bool,
}

/// List regular files under `path`.
///
/// # Errors
///
/// Returns [`ComposeError::EmptyPath`] if `path` is empty.
pub fn list_files(path: &str, options: &ListOptions<'_>) -> Result<String, ComposeError> {
    let mut command = format!("find {}", quoted_path(path)?);
    if !options.recursive {
        command.push_str(" -maxdepth 1");
    }
    if let Some(pattern) = options.pattern.filter(|p| !p.is_empty()) {
        let test = if pattern.contains('/') { "-path" } else { "-name" };
        command.push_str(&format!(" {test} {}", shell_quote(pattern)));
    }
    command.push_str(" -type f");
    if options.skip_errors {
        command.push_str(" 2>/dev/null");
    }
    Ok(command)
}

/// Quote `path`, prefixing `./` when it would otherwise read as an option
/// or a `find` expression.
fn quoted_path(path: &str) -> Result<String, ComposeError> {
    if path.is_empty() {
        return Err(ComposeError::EmptyPath);
    }
    if path.starts_with('-') {
        return Ok(shell_quote(&format!("./{path}")));
    }
    Ok(shell_quote(path))
}

fn validate_mode(mode: &str) -> Result<(), ComposeError> {
    let valid = (3..=4).contains(&mode.len()) && mode.bytes().all(|b| (b'0'..=b'7').contains(&b));
    if valid {
        Ok(())
    } else {
        Err(ComposeError::InvalidMode(mode.to_string()))
    }
}
