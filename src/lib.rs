//! MCP workload gateway.
//!
//! Runs MCP servers as managed workloads and puts an HTTP proxy in front of
//! each one: stdio servers are bridged to SSE or streamable HTTP, HTTP servers
//! are reverse proxied. Workloads can be grouped, and a group can be torn
//! down in one call.

// Core subsystems
pub mod config;
pub mod deployer;
pub mod net;
pub mod transport;

// Management
pub mod admin;
pub mod groups;
pub mod lifecycle;
pub mod workloads;

// Cross-cutting concerns
pub mod error;
pub mod middleware;
pub mod observability;
pub mod resilience;

pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use groups::GroupManager;
pub use lifecycle::Shutdown;
pub use transport::{Transport, TransportConfig, TransportFactory, TransportKind};
pub use workloads::WorkloadManager;
