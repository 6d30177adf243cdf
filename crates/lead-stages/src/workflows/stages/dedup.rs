use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

/// Session key holding the correlation ids already processed.
pub const TRIGGERED_ACTIONS_KEY: &str = "stages.triggered_actions";

/// Per-visitor session storage. Values may be lost when the session expires.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
}

/// Best-effort "seen this correlation id in this session" check.
pub struct DeduplicationGuard<'s> {
    session: &'s dyn SessionStore,
}

impl<'s> DeduplicationGuard<'s> {
    pub fn new(session: &'s dyn SessionStore) -> Self {
        Self { session }
    }

    pub fn seen(&self, correlation_id: &str) -> bool {
        self.ids().iter().any(|id| id == correlation_id)
    }

    pub fn mark_seen(&self, correlation_id: &str) {
        let mut ids = self.ids();
        if ids.iter().any(|id| id == correlation_id) {
            return;
        }
        ids.push(correlation_id.to_string());
        self.session.set(
            TRIGGERED_ACTIONS_KEY,
            Value::Array(ids.into_iter().map(Value::String).collect()),
        );
    }

    /// Non-string entries written by anything else are ignored.
    fn ids(&self) -> Vec<String> {
        match self.session.get(TRIGGERED_ACTIONS_KEY) {
            Some(Value::Array(values)) => values
                .into_iter()
                .filter_map(|value| match value {
                    Value::String(id) => Some(id),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemorySession {
    values: Mutex<HashMap<String, Value>>,
}

impl SessionStore for MemorySession {
    fn get(&self, key: &str) -> Option<Value> {
        self.values
            .lock()
            .expect("session mutex poisoned")
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.values
            .lock()
            .expect("session mutex poisoned")
            .insert(key.to_string(), value);
    }
}

/// Idle time after which a session and its correlation ids are dropped.
pub const DEFAULT_SESSION_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug)]
struct SessionEntry {
    session: Arc<MemorySession>,
    touched: Instant,
}

#[derive(Debug)]
struct SessionTable {
    entries: HashMap<String, SessionEntry>,
    last_sweep: Instant,
}

/// In-process sessions keyed by the client's session id.
///
/// Sessions idle for longer than the TTL are forgotten. Idle entries are
/// swept on access, at most once per TTL.
#[derive(Debug)]
pub struct SessionRegistry {
    idle_ttl: Duration,
    table: Mutex<SessionTable>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_idle_ttl(DEFAULT_SESSION_IDLE_TTL)
    }
}

impl SessionRegistry {
    pub fn with_idle_ttl(idle_ttl: Duration) -> Self {
        Self {
            idle_ttl,
            table: Mutex::new(SessionTable {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    pub fn session(&self, session_id: &str) -> Arc<MemorySession> {
        self.session_at(session_id, Instant::now())
    }

    fn session_at(&self, session_id: &str, now: Instant) -> Arc<MemorySession> {
        let mut table = self.table.lock().expect("session registry mutex poisoned");
        if now.saturating_duration_since(table.last_sweep) >= self.idle_ttl {
            let idle_ttl = self.idle_ttl;
            let before = table.entries.len();
            table
                .entries
                .retain(|_, entry| now.saturating_duration_since(entry.touched) < idle_ttl);
            let evicted = before - table.entries.len();
            if evicted > 0 {
                debug!(evicted, "expired idle stage sessions");
            }
            table.last_sweep = now;
        }

        let idle_ttl = self.idle_ttl;
        let entry = table
            .entries
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry {
                session: Arc::default(),
                touched: now,
            });
        if now.saturating_duration_since(entry.touched) >= idle_ttl {
            entry.session = Arc::default();
        }
        entry.touched = now;
        entry.session.clone()
    }

    /// Forget a session, as on expiry.
    pub fn expire(&self, session_id: &str) -> bool {
        self.table
            .lock()
            .expect("session registry mutex poisoned")
            .entries
            .remove(session_id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.table
            .lock()
            .expect("session registry mutex poisoned")
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
