//! Transport proxy subsystem.
//!
//! # Data Flow
//! ```text
//! TransportConfig
//!     → factory.rs (dispatch on kind, install named middlewares)
//!     → StdioTransport  (stdio.rs + bridge.rs)
//!     |   client ⇄ HTTP listener ⇄ writer task → child stdin
//!     |                         ⇠ reader task ⇠ child stdout
//!     → HttpTransport   (http.rs)
//!         client ⇄ HTTP listener ⇄ reverse proxy ⇄ backend sse / streamable-http
//! ```
//!
//! # Design Decisions
//! - One listener per transport, bound on start and closed on stop
//! - Backends come from a [`Deployer`]; transports never spawn processes
//! - Optional capabilities are discovered through trait methods, not type checks

pub mod bridge;
pub mod factory;
pub mod headers;
pub mod http;
pub mod state;
pub mod stdio;

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::deployer::{
    Deployer, DeployerError, Deployment, DeploymentGuard, WorkloadHandle, WorkloadSpec,
};
use crate::middleware::auth::ProtectedResourceMetadata;
use crate::middleware::Middleware;
use crate::resilience::timeouts::{with_deadline, Interrupted};

pub use factory::TransportFactory;
pub use http::{HttpMode, HttpTransport};
pub use state::TransportState;
pub use stdio::StdioTransport;

/// Wire transport a backing MCP server speaks.
///
/// Unrecognized names are kept verbatim so they can be reported back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransportKind {
    #[default]
    Stdio,
    Sse,
    StreamableHttp,
    /// Reserved name; no transport implements it.
    Inspector,
    Unknown(String),
}

impl TransportKind {
    pub fn as_str(&self) -> &str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::StreamableHttp => "streamable-http",
            TransportKind::Inspector => "inspector",
            TransportKind::Unknown(other) => other,
        }
    }

    /// Whether the backend is reached over HTTP rather than pipes.
    pub fn is_http(&self) -> bool {
        matches!(self, TransportKind::Sse | TransportKind::StreamableHttp)
    }
}

impl From<&str> for TransportKind {
    fn from(s: &str) -> Self {
        match s {
            "stdio" => TransportKind::Stdio,
            "sse" => TransportKind::Sse,
            "streamable-http" => TransportKind::StreamableHttp,
            "inspector" => TransportKind::Inspector,
            other => TransportKind::Unknown(other.to_string()),
        }
    }
}

impl From<String> for TransportKind {
    fn from(s: String) -> Self {
        TransportKind::from(s.as_str())
    }
}

impl From<TransportKind> for String {
    fn from(kind: TransportKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a stdio backend is exposed to HTTP clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyMode {
    #[default]
    Sse,
    StreamableHttp,
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyMode::Sse => f.write_str("sse"),
            ProxyMode::StreamableHttp => f.write_str("streamable-http"),
        }
    }
}

/// Deadlines applied by transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportTimeouts {
    pub deploy: Duration,
    pub stop: Duration,
    pub backend_ready: Duration,
    /// Upper bound for one proxied request (or one correlated stdio reply).
    pub request: Duration,
    /// Grace period for open streams when the listener closes.
    pub drain: Duration,
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        Self {
            deploy: Duration::from_secs(60),
            stop: Duration::from_secs(30),
            backend_ready: Duration::from_secs(10),
            request: Duration::from_secs(60),
            drain: Duration::from_secs(5),
        }
    }
}

/// Everything needed to build and run one transport.
#[derive(Clone)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub host: String,
    /// 0 binds an ephemeral port.
    pub proxy_port: u16,
    pub target_host: String,
    pub target_port: u16,
    pub debug: bool,
    pub deployer: Arc<dyn Deployer>,
    /// Default chain, first entry outermost.
    pub middlewares: Vec<Arc<dyn Middleware>>,
    /// Route name → middleware, for transports that support it.
    pub named_middlewares: HashMap<String, Arc<dyn Middleware>>,
    pub metrics: Option<PrometheusHandle>,
    pub auth_info: Option<ProtectedResourceMetadata>,
    /// Only meaningful for stdio.
    pub proxy_mode: ProxyMode,
    pub timeouts: TransportTimeouts,
}

impl TransportConfig {
    pub fn new(kind: impl Into<TransportKind>, deployer: Arc<dyn Deployer>) -> Self {
        Self {
            kind: kind.into(),
            host: "127.0.0.1".to_string(),
            proxy_port: 0,
            target_host: "127.0.0.1".to_string(),
            target_port: 0,
            debug: false,
            deployer,
            middlewares: Vec::new(),
            named_middlewares: HashMap::new(),
            metrics: None,
            auth_info: None,
            proxy_mode: ProxyMode::default(),
            timeouts: TransportTimeouts::default(),
        }
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("proxy_port", &self.proxy_port)
            .field("target_host", &self.target_host)
            .field("target_port", &self.target_port)
            .field("debug", &self.debug)
            .field(
                "middlewares",
                &self.middlewares.iter().map(|m| m.name().to_string()).collect::<Vec<_>>(),
            )
            .field("named_middlewares", &self.named_middlewares.keys().collect::<Vec<_>>())
            .field("metrics", &self.metrics.is_some())
            .field("auth_info", &self.auth_info.is_some())
            .field("proxy_mode", &self.proxy_mode)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

/// Errors produced while building or running a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("unsupported transport type: {0}")]
    Unsupported(TransportKind),

    #[error("transport is {actual}, expected {expected}")]
    InvalidState {
        expected: TransportState,
        actual: TransportState,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Deployer(#[from] DeployerError),

    #[error("deployer returned no stdio pipes for workload {0}")]
    MissingStdio(String),

    #[error("bridging failed: {0}")]
    Bridging(#[source] std::io::Error),

    #[error("transport operation cancelled")]
    Cancelled,

    #[error("transport {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl From<Interrupted> for TransportError {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::Cancelled => TransportError::Cancelled,
            Interrupted::TimedOut { operation, after } => TransportError::Timeout { operation, after },
        }
    }
}

/// A client-facing endpoint in front of one backing MCP server.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn state(&self) -> TransportState;

    /// Listen address, known once started.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Deployer handle of the backend, known once started.
    fn handle(&self) -> Option<WorkloadHandle>;

    /// Deploy the backend described by `spec` and begin serving clients.
    async fn start(&self, spec: WorkloadSpec, cancel: &CancellationToken) -> Result<(), TransportError>;

    /// Close the listener and stop the backend.
    async fn stop(&self, cancel: &CancellationToken) -> Result<(), TransportError>;

    /// Named-middleware capability, for transports that route by name.
    fn named_middlewares(&self) -> Option<&dyn NamedMiddlewareSupport> {
        None
    }
}

/// Optional capability: middlewares addressed by route name.
pub trait NamedMiddlewareSupport: Send + Sync {
    /// Replace the whole set.
    fn set_named_middlewares(&self, middlewares: HashMap<String, Arc<dyn Middleware>>);

    /// Add or override one entry; takes effect on the next request.
    fn attach_named_middleware(&self, route: &str, middleware: Arc<dyn Middleware>);

    fn named_middleware(&self, route: &str) -> Option<Arc<dyn Middleware>>;
}

/// Ask the deployer for a backend, bounded by the deploy deadline.
///
/// The returned guard stops the backend unless the caller disarms it.
pub(crate) async fn deploy(
    config: &TransportConfig,
    spec: &WorkloadSpec,
    cancel: &CancellationToken,
) -> Result<(Deployment, DeploymentGuard), TransportError> {
    let deployer = Arc::clone(&config.deployer);
    let deployment = with_deadline(
        cancel,
        config.timeouts.deploy,
        "deploy",
        deployer.start(spec, cancel),
    )
    .await?;
    tracing::info!(
        workload = %spec.name,
        handle = %deployment.handle,
        kind = %spec.transport,
        "Backend deployed"
    );
    let guard = DeploymentGuard::new(deployer, deployment.handle.clone());
    Ok((deployment, guard))
}

/// Stop a backend whose transport failed to come up.
pub(crate) async fn release(config: &TransportConfig, guard: DeploymentGuard) {
    let handle = guard.handle().clone();
    let cancel = CancellationToken::new();
    let result = with_deadline(&cancel, config.timeouts.stop, "stop", guard.release(&cancel)).await;
    if let Err(e) = result {
        tracing::error!(handle = %handle, error = %e, "Failed to stop backend after failed start");
    }
}

/// Stop a running backend, treating an already-gone backend as stopped.
pub(crate) async fn stop_backend(
    config: &TransportConfig,
    handle: &WorkloadHandle,
    cancel: &CancellationToken,
) -> Result<(), TransportError> {
    let result = with_deadline(
        cancel,
        config.timeouts.stop,
        "stop",
        config.deployer.stop(handle, cancel),
    )
    .await;
    match result {
        Ok(()) => Ok(()),
        Err(DeployerError::NotFound(_)) => {
            tracing::debug!(handle = %handle, "Backend already gone");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_strings() {
        for name in ["stdio", "sse", "streamable-http", "inspector"] {
            let kind = TransportKind::from(name);
            assert!(!matches!(kind, TransportKind::Unknown(_)));
            assert_eq!(kind.as_str(), name);
        }
        assert_eq!(
            TransportKind::from("carrier-pigeon"),
            TransportKind::Unknown("carrier-pigeon".into())
        );
    }

    #[test]
    fn kind_deserializes_unknown_values() {
        #[derive(Deserialize)]
        struct Wrapper {
            kind: TransportKind,
        }
        let w: Wrapper = toml::from_str(r#"kind = "websocket""#).unwrap();
        assert_eq!(w.kind.to_string(), "websocket");
    }

    #[test]
    fn proxy_mode_is_kebab_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: ProxyMode,
        }
        let w: Wrapper = toml::from_str(r#"mode = "streamable-http""#).unwrap();
        assert_eq!(w.mode, ProxyMode::StreamableHttp);
    }
}
