//! Deployer contract.
//!
//! # Data Flow
//! ```text
//! Transport::start
//!     → Deployer::start(spec)     (process, container, pod...)
//!     → Deployment { handle, address | stdio pipes }
//!     → DeploymentGuard           (stops the backend unless disarmed)
//!
//! Transport::stop / Workload deletion
//!     → Deployer::stop(handle)
//! ```
//!
//! # Design Decisions
//! - The proxy only relies on this contract, never on the backend flavour
//! - Every call takes a cancellation token; callers add deadlines
//! - Handles are opaque strings owned by the deployer that issued them

pub mod guard;
pub mod process;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::resilience::timeouts::Interrupted;
use crate::transport::TransportKind;

pub use guard::DeploymentGuard;
pub use process::ProcessDeployer;

/// Everything a deployer needs to bring up one backing MCP server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Workload name, unique within a workload manager.
    pub name: String,

    /// Optional group the workload belongs to.
    #[serde(default)]
    pub group: Option<String>,

    /// Executable (process deployer) or image reference (container deployers).
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Wire transport the backend speaks. Set by the transport before deploying.
    #[serde(default)]
    pub transport: TransportKind,

    /// Host the backend should listen on (HTTP transports only).
    #[serde(default)]
    pub target_host: Option<String>,

    /// Port the backend should listen on (HTTP transports only).
    #[serde(default)]
    pub target_port: Option<u16>,
}

impl WorkloadSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Opaque reference to a started backend (pid, container id, pod name...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkloadHandle(String);

impl WorkloadHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exclusive ownership of a backend's standard streams.
pub struct StdioPipes {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
}

impl fmt::Debug for StdioPipes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdioPipes").finish_non_exhaustive()
    }
}

/// Result of a successful [`Deployer::start`].
#[derive(Debug)]
pub struct Deployment {
    pub handle: WorkloadHandle,
    /// Reachable `host:port` of the backend, for HTTP transports.
    pub address: Option<String>,
    /// Standard streams of the backend, for the stdio transport.
    pub stdio: Option<StdioPipes>,
}

/// Errors reported by a deployer.
#[derive(Debug, thiserror::Error)]
pub enum DeployerError {
    #[error("failed to start workload {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to stop workload {handle}: {reason}")]
    Stop { handle: WorkloadHandle, reason: String },

    #[error("no deployed workload with handle {0}")]
    NotFound(WorkloadHandle),

    #[error("deployer unavailable: {0}")]
    Unavailable(String),

    #[error("deployer {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("deployer call cancelled")]
    Cancelled,
}

impl From<Interrupted> for DeployerError {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::Cancelled => DeployerError::Cancelled,
            Interrupted::TimedOut { operation, after } => DeployerError::Timeout { operation, after },
        }
    }
}

/// Starts and stops the backends behind transports.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Bring up the backend described by `spec`.
    async fn start(
        &self,
        spec: &WorkloadSpec,
        cancel: &CancellationToken,
    ) -> Result<Deployment, DeployerError>;

    /// Tear down a backend previously returned by [`Deployer::start`].
    async fn stop(
        &self,
        handle: &WorkloadHandle,
        cancel: &CancellationToken,
    ) -> Result<(), DeployerError>;
}
