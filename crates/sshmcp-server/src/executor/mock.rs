// Intentionally public: integration test binaries build an `AppState` around
// `ScriptedTransport` via `sshmcp_server::executor::mock`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sshmcp_common::{CommandResult, RemoteTarget};

use super::{RemoteInvocation, RemoteTransport, TransportError};

type Handler =
    dyn Fn(&RemoteTarget, &RemoteInvocation) -> Result<CommandResult, TransportError> + Send + Sync;

/// A recorded call to [`ScriptedTransport::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub target: RemoteTarget,
    pub invocation: RemoteInvocation,
}

/// Transport that answers through a closure instead of a network.
///
/// Records every call, the order in which calls finished and the peak number
/// of calls in flight, so tests can assert on scheduling.
pub struct ScriptedTransport {
    handler: Box<Handler>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<RecordedCall>>,
    completed: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&RemoteTarget, &RemoteInvocation) -> Result<CommandResult, TransportError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            handler: Box::new(handler),
            delays: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every command exits 0 and echoes itself on stdout.
    pub fn echoing() -> Self {
        Self::new(|_, inv| Ok(CommandResult::new(inv.command.clone(), "", 0)))
    }

    /// Delay the answer for `command` by `delay`.
    #[must_use]
    pub fn with_delay(mut self, command: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(command.into(), delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|c| c.invocation.command)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Commands in the order their answers were produced.
    pub fn completion_order(&self) -> Vec<String> {
        self.completed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RemoteTransport for ScriptedTransport {
    async fn run(
        &self,
        target: &RemoteTarget,
        invocation: &RemoteInvocation,
    ) -> Result<CommandResult, TransportError> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(RecordedCall {
                target: target.clone(),
                invocation: invocation.clone(),
            });
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(&invocation.command) {
            tokio::time::sleep(*delay).await;
        }
        let result = (self.handler)(target, invocation);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(invocation.command.clone());
        result
    }
}

/// Shared file table behind [`in_memory_host`].
pub type MemoryFiles = std::sync::Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// A scripted remote host with an in-memory filesystem.
///
/// Understands the command shapes produced by `sshmcp_common::compose`
/// (`cat > 'p'`, `cat -- 'p'`, `find 'dir' ...`); anything else exits 0
/// with the command echoed on stdout.
pub fn in_memory_host() -> (ScriptedTransport, MemoryFiles) {
    in_memory_host_capped(usize::MAX)
}

/// Like [`in_memory_host`], but file reads keep at most `max_output_bytes`
/// and mark the result truncated, as the SSH transport does.
pub fn in_memory_host_capped(max_output_bytes: usize) -> (ScriptedTransport, MemoryFiles) {
    let files: MemoryFiles = std::sync::Arc::new(Mutex::new(HashMap::new()));
    let fs = std::sync::Arc::clone(&files);
    let transport = ScriptedTransport::new(move |_, inv| {
        let mut fs = fs.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let command = inv.command.as_str();
        if let Some(rest) = command.strip_prefix("cat > ") {
            let path = unquote(rest.split(" && ").next().unwrap_or(rest));
            fs.insert(path, inv.stdin.clone().unwrap_or_default());
            return Ok(CommandResult::new("", "", 0));
        }
        if let Some(rest) = command.strip_prefix("cat -- ") {
            let path = unquote(rest);
            return Ok(fs.get(&path).map_or_else(
                || CommandResult::new("", format!("cat: {path}: No such file or directory"), 1),
                |bytes| {
                    let kept = bytes.len().min(max_output_bytes);
                    CommandResult::from_bytes(bytes[..kept].to_vec(), Vec::new(), 0)
                        .with_truncated(kept < bytes.len())
                },
            ));
        }
        if let Some(rest) = command.strip_prefix("find ") {
            let dir = unquote(rest.split(" -").next().unwrap_or(rest));
            let mut listing: Vec<&String> =
                fs.keys().filter(|p| p.starts_with(&format!("{dir}/"))).collect();
            listing.sort();
            let stdout = listing
                .into_iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join("\n");
            return Ok(CommandResult::new(stdout, "", 0));
        }
        Ok(CommandResult::new(inv.command.clone(), "", 0))
    });
    (transport, files)
}

/// Reverse `shell_quote` for a single quoted word.
fn unquote(word: &str) -> String {
    let word = word.trim();
    word.strip_prefix('\'')
        .and_then(|w| w.strip_suffix('\''))
        .unwrap_or(word)
        .replace("'\\''", "'")
}
