//! Workload records and errors.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deployer::WorkloadHandle;
use crate::transport::{TransportError, TransportKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadStatus {
    Pending,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkloadStatus::Pending => "pending",
            WorkloadStatus::Starting => "starting",
            WorkloadStatus::Running => "running",
            WorkloadStatus::Stopping => "stopping",
            WorkloadStatus::Stopped => "stopped",
            WorkloadStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// A managed workload as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub name: String,
    pub group: Option<String>,
    pub handle: Option<WorkloadHandle>,
    pub status: WorkloadStatus,
    pub created_at: DateTime<Utc>,
    pub transport: TransportKind,
    /// `http://host:port` of the proxy, once listening.
    pub proxy_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    #[error("workload {0} already exists")]
    AlreadyExists(String),

    #[error("workload {0} not found")]
    NotFound(String),

    #[error("invalid workload name: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("group {group} does not exist (workload {name})")]
    GroupNotFound { name: String, group: String },

    #[error("workload {name}: {source}")]
    Transport {
        name: String,
        #[source]
        source: TransportError,
    },

    #[error("operation on workload {0} cancelled")]
    Cancelled(String),
}

impl WorkloadError {
    /// Name of the workload the error is about.
    pub fn workload(&self) -> &str {
        match self {
            WorkloadError::AlreadyExists(name)
            | WorkloadError::NotFound(name)
            | WorkloadError::Cancelled(name) => name,
            WorkloadError::InvalidName { name, .. }
            | WorkloadError::GroupNotFound { name, .. }
            | WorkloadError::Transport { name, .. } => name,
        }
    }
}
