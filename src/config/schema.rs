//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::middleware::auth::ProtectedResourceMetadata;
use crate::transport::{ProxyMode, TransportKind, TransportTimeouts};

/// Root configuration for the gateway daemon.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Admin API settings.
    pub admin: AdminConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Deadlines applied by every transport.
    pub timeouts: TimeoutConfig,

    /// Bearer token validation for the `auth` middleware.
    pub auth: Option<AuthConfig>,

    /// Settings for the `rate-limit` middleware.
    pub rate_limit: RateLimitConfig,

    /// Groups created at startup.
    pub groups: Vec<String>,

    /// Workloads launched at startup.
    pub workloads: Vec<WorkloadConfig>,
}

/// One managed MCP server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Unique workload name.
    pub name: String,

    /// Group to join; must be declared in `groups`.
    pub group: Option<String>,

    /// Executable to run.
    pub command: String,

    pub args: Vec<String>,

    pub env: BTreeMap<String, String>,

    /// `stdio`, `sse` or `streamable-http`.
    pub transport: TransportKind,

    /// How a stdio server is exposed (`sse` or `streamable-http`).
    pub proxy_mode: ProxyMode,

    /// Proxy bind host.
    pub host: String,

    /// Proxy port, 0 for ephemeral.
    pub proxy_port: u16,

    /// Where an HTTP server listens.
    pub target_host: String,

    /// Required for `sse` and `streamable-http`.
    pub target_port: Option<u16>,

    /// Verbose request tracing for this workload.
    pub debug: bool,

    /// Default middleware chain, outermost first.
    pub middlewares: Vec<String>,

    /// Route name (`proxy`, `metrics`, `auth-info`, `health`) → middleware.
    pub named_middlewares: BTreeMap<String, String>,

    /// Document served at `/.well-known/oauth-protected-resource`.
    pub auth_info: Option<ProtectedResourceMetadata>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            group: None,
            command: String::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            transport: TransportKind::Stdio,
            proxy_mode: ProxyMode::Sse,
            host: "127.0.0.1".to_string(),
            proxy_port: 0,
            target_host: "127.0.0.1".to_string(),
            target_port: None,
            debug: false,
            middlewares: Vec::new(),
            named_middlewares: BTreeMap::new(),
            auth_info: None,
        }
    }
}

/// Timeout configuration for transport operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deployer start deadline in seconds.
    pub deploy_secs: u64,

    /// Deployer stop deadline in seconds.
    pub stop_secs: u64,

    /// How long to wait for an HTTP backend to accept connections.
    pub backend_ready_secs: u64,

    /// Per-request deadline in seconds.
    pub request_secs: u64,

    /// Grace period for open streams on stop, in seconds.
    pub drain_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let defaults = TransportTimeouts::default();
        Self {
            deploy_secs: defaults.deploy.as_secs(),
            stop_secs: defaults.stop.as_secs(),
            backend_ready_secs: defaults.backend_ready.as_secs(),
            request_secs: defaults.request.as_secs(),
            drain_secs: defaults.drain.as_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn to_transport_timeouts(&self) -> TransportTimeouts {
        TransportTimeouts {
            deploy: Duration::from_secs(self.deploy_secs),
            stop: Duration::from_secs(self.stop_secs),
            backend_ready: Duration::from_secs(self.backend_ready_secs),
            request: Duration::from_secs(self.request_secs),
            drain: Duration::from_secs(self.drain_secs),
        }
    }
}

/// Bearer token validation settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// JWKS endpoint; refetched when a token names an unknown key.
    pub jwks_url: Option<String>,

    /// Static JWKS document on disk.
    pub jwks_file: Option<PathBuf>,

    /// Required audience.
    pub audience: String,

    /// Scopes the token must all carry.
    pub scopes: Vec<String>,

    /// Required issuer, if any.
    pub issuer: Option<String>,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained requests per second per client.
    pub requests_per_second: u32,

    /// Burst capacity.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 100,
            burst_size: 50,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Exporter bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
