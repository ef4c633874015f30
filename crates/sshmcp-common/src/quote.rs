/// Quote a value for safe inclusion in a POSIX shell command line.
///
/// The value is wrapped in single quotes and every embedded single quote is
/// rewritten as `'\''`, so the shell sees exactly one word with no expansion.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}
