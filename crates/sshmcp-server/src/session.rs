use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rmcp::transport::streamable_http_server::session::{
    SessionManager, local::LocalSessionManager,
};

/// An active MCP conversation.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    last_seen: Instant,
}

/// Registry of active sessions, keyed by the identifier `rmcp` issues on
/// `initialize`.
///
/// The streamable HTTP service keeps the protocol state of each session in
/// [`LocalSessionManager`]; this registry decides which of those sessions are
/// still live. Sessions idle for longer than the configured timeout are
/// treated as unknown, evicted here and closed in the session manager.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
    idle_timeout: Duration,
    manager: Arc<LocalSessionManager>,
}

impl SessionRegistry {
    /// Sweep expired sessions once the map exceeds this many entries.
    const EVICTION_THRESHOLD: usize = 1_000;

    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
            manager: Arc::new(LocalSessionManager::default()),
        }
    }

    /// Session manager handed to the streamable HTTP service.
    pub fn manager(&self) -> Arc<LocalSessionManager> {
        Arc::clone(&self.manager)
    }

    /// Start tracking a session the service just opened.
    pub async fn register(&self, id: &str) {
        let now = Instant::now();
        let expired: Vec<String> = {
            let mut guard = self
                .sessions
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let mut expired = Vec::new();
            if guard.len() > Self::EVICTION_THRESHOLD {
                guard.retain(|key, s| {
                    let live = now.duration_since(s.last_seen) < self.idle_timeout;
                    if !live {
                        expired.push(key.clone());
                    }
                    live
                });
            }
            guard.insert(
                id.to_string(),
                Session {
                    id: id.to_string(),
                    created_at: Utc::now(),
                    last_seen: now,
                },
            );
            expired
        };
        tracing::info!(session_id = %id, "session initialized");
        for stale in expired {
            self.close(&stale).await;
        }
    }

    /// Look up `id`, refreshing its idle timer. Returns `None` for unknown or
    /// expired sessions; expired ones are removed.
    pub fn touch(&self, id: &str) -> Option<Session> {
        let now = Instant::now();
        let mut guard = self
            .sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match guard.get_mut(id) {
            None => return None,
            Some(session) if now.duration_since(session.last_seen) < self.idle_timeout => {
                session.last_seen = now;
                return Some(session.clone());
            }
            Some(_) => {}
        }
        guard.remove(id);
        drop(guard);
        tracing::info!(session_id = %id, "session expired");
        None
    }

    /// Stop tracking a session. Returns `false` if it was not active.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self
            .sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(id);
        match removed {
            Some(session) => {
                tracing::info!(session_id = %id, opened_at = %session.created_at, "session closed");
                true
            }
            None => false,
        }
    }

    /// Drop `id` here and tear down its protocol state in the session manager.
    pub async fn close(&self, id: &str) {
        self.remove(id);
        let key: Arc<str> = Arc::from(id);
        if let Ok(true) = self.manager.has_session(&key).await
            && let Err(e) = self.manager.close_session(&key).await
        {
            tracing::warn!(session_id = %id, "failed to close session: {e}");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
