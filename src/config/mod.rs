//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, every problem reported at once)
//!     → GatewayConfig (validated, immutable)
//!     → lifecycle::startup turns each WorkloadConfig into a TransportConfig
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; runtime changes go through the admin API
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, AuthConfig, GatewayConfig, ObservabilityConfig, RateLimitConfig, TimeoutConfig,
    WorkloadConfig,
};
pub use validation::ValidationError;
