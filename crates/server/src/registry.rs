//! Live WebSocket sessions: close handles, idle tracking and the per-session
//! busy flag that keeps response cycles from overlapping.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

pub type SharedRegistry = Arc<Mutex<SessionRegistry>>;

struct SessionEntry {
    close_tx: watch::Sender<bool>,
    last_activity: Instant,
    busy: bool,
}

pub struct SessionRegistry {
    sessions: HashMap<String, SessionEntry>,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            idle_timeout,
        }
    }

    pub fn shared(idle_timeout: Duration) -> SharedRegistry {
        Arc::new(Mutex::new(Self::new(idle_timeout)))
    }

    /// Register a new session. The receiver flips to `true` when the session
    /// is removed or swept.
    pub fn create(&mut self, now: Instant) -> (String, watch::Receiver<bool>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (close_tx, close_rx) = watch::channel(false);
        self.sessions.insert(
            id.clone(),
            SessionEntry {
                close_tx,
                last_activity: now,
                busy: false,
            },
        );
        (id, close_rx)
    }

    pub fn touch(&mut self, session_id: &str, now: Instant) {
        if let Some(entry) = self.sessions.get_mut(session_id) {
            entry.last_activity = now;
        }
    }

    pub fn is_busy(&self, session_id: &str) -> bool {
        self.sessions.get(session_id).is_some_and(|e| e.busy)
    }

    pub fn set_busy(&mut self, session_id: &str, busy: bool) {
        if let Some(entry) = self.sessions.get_mut(session_id) {
            entry.busy = busy;
        }
    }

    /// Mark the session busy unless a cycle is already running.
    /// Returns `false` for busy or unknown sessions.
    pub fn try_begin_cycle(&mut self, session_id: &str) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(entry) if !entry.busy => {
                entry.busy = true;
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Drop the session and signal its close handle. No-op when unknown.
    pub fn remove(&mut self, session_id: &str) -> bool {
        match self.sessions.remove(session_id) {
            Some(entry) => {
                entry.close_tx.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Close every session idle for at least the timeout, busy or not.
    pub fn sweep(&mut self, now: Instant) -> Vec<String> {
        let idle_timeout = self.idle_timeout;
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.last_activity) >= idle_timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.remove(id);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Lock the registry, recovering from a poisoned mutex.
pub fn lock(registry: &SharedRegistry) -> std::sync::MutexGuard<'_, SessionRegistry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Periodically close idle sessions until `shutdown` flips to `true`.
pub async fn run_sweeper(
    registry: SharedRegistry,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(every);
    // First tick fires immediately.
    tick.tick().await;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let expired = lock(&registry).sweep(Instant::now());
                if !expired.is_empty() {
                    info!("closed {} idle session(s)", expired.len());
                }
                for id in expired {
                    debug!(session_id = %id, "session expired");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("sweeper shutting down");
                    break;
                }
            }
        }
    }
}
