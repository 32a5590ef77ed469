//! Transport lifecycle state.

use std::fmt;
use std::sync::Mutex;

use serde::Serialize;

/// `Created → Starting → Running → Stopping → Stopped | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportState::Created => "created",
            TransportState::Starting => "starting",
            TransportState::Running => "running",
            TransportState::Stopping => "stopping",
            TransportState::Stopped => "stopped",
            TransportState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Shared, lock-protected state with checked transitions.
#[derive(Debug)]
pub struct StateCell(Mutex<TransportState>);

impl StateCell {
    pub fn new() -> Self {
        Self(Mutex::new(TransportState::Created))
    }

    pub fn get(&self) -> TransportState {
        *self.0.lock().expect("transport state mutex poisoned")
    }

    pub fn set(&self, next: TransportState) {
        *self.0.lock().expect("transport state mutex poisoned") = next;
    }

    /// Move to `next` only if currently `expected`; returns the observed state on mismatch.
    pub fn transition(&self, expected: TransportState, next: TransportState) -> Result<(), TransportState> {
        let mut state = self.0.lock().expect("transport state mutex poisoned");
        if *state != expected {
            return Err(*state);
        }
        *state = next;
        Ok(())
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
