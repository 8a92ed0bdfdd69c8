//! Persisted shell session record.

use std::{
    collections::HashMap,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Session accepts commands.
    #[default]
    Active,
    /// Session idled past its TTL.
    Expired,
}

/// One client's interactive command session.
///
/// Stored as JSON so every instance sharing the backend can read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Client-scoped opaque identifier.
    pub id: String,
    /// User-defined per-session state.
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
    /// Creation timestamp (Unix epoch milliseconds).
    pub created_at: i64,
    /// Last activity timestamp (Unix epoch milliseconds).
    pub last_active_at: i64,
    /// Lifecycle state.
    #[serde(default)]
    pub state: SessionState,
}

/// Current time in Unix epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

impl Session {
    /// Create a fresh active session.
    pub fn new(id: impl Into<String>) -> Self {
        let timestamp = now_millis();
        Self {
            id: id.into(),
            attributes: HashMap::new(),
            created_at: timestamp,
            last_active_at: timestamp,
            state: SessionState::Active,
        }
    }

    /// Refresh the last-activity timestamp.
    pub fn touch(&mut self) {
        self.last_active_at = now_millis().max(self.last_active_at);
    }

    /// Mark the session expired.
    pub const fn expire(&mut self) {
        self.state = SessionState::Expired;
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Whether the session has been idle for at least `ttl` as of `now_ms`.
    #[must_use]
    pub fn is_idle_for(&self, ttl: Duration, now_ms: i64) -> bool {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(self.last_active_at) >= ttl_ms
    }

    /// Get an attribute by key.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Set an attribute.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: Value) {
        self.attributes.insert(key.into(), value);
    }

    /// Remove an attribute, returning its previous value.
    pub fn remove_attribute(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }
}
