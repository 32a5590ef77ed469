//! Client stream tracking.
//!
//! # Responsibilities
//! - Assign a unique ID to each long-lived client stream (SSE sessions)
//! - Keep the set of open streams per transport
//! - Publish the open-stream count as a gauge

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::observability::metrics;

/// Unique identifier for a client session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn parse(raw: &str) -> Self {
        Self(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Open sessions of one transport.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    workload: Arc<str>,
    sessions: Arc<DashMap<SessionId, ()>>,
}

impl SessionTracker {
    pub fn new(workload: &str) -> Self {
        Self {
            workload: Arc::from(workload),
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Register a new session. It is removed when the guard drops.
    pub fn open(&self) -> SessionGuard {
        let id = SessionId::new();
        self.sessions.insert(id.clone(), ());
        metrics::set_active_sessions(&self.workload, self.sessions.len());
        tracing::debug!(workload = %self.workload, session_id = %id, "Session opened");
        SessionGuard {
            tracker: self.clone(),
            id,
        }
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Keeps a session registered for as long as it lives.
#[derive(Debug)]
pub struct SessionGuard {
    tracker: SessionTracker,
    id: SessionId,
}

impl SessionGuard {
    pub fn id(&self) -> &SessionId {
        &self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.tracker.sessions.remove(&self.id);
        metrics::set_active_sessions(&self.tracker.workload, self.tracker.sessions.len());
        tracing::debug!(workload = %self.tracker.workload, session_id = %self.id, "Session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn tracker_counts() {
        let tracker = SessionTracker::new("w");
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.open();
        let guard2 = tracker.open();
        assert_eq!(tracker.active_count(), 2);
        assert!(tracker.contains(guard1.id()));

        let id1 = guard1.id().clone();
        drop(guard1);
        assert_eq!(tracker.active_count(), 1);
        assert!(!tracker.contains(&id1));

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }
}
