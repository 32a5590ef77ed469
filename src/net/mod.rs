//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Transport start
//!     → listener.rs (bind host:port, spawn axum server with graceful shutdown)
//!     → connection.rs (track long-lived client streams)
//!
//! Transport stop
//!     → ServerHandle::shutdown (stop accepting, drain, abort after deadline)
//! ```
//!
//! # Design Decisions
//! - One listener per transport; a port bound twice fails the second start
//! - Open event streams are tracked so shutdown can report what it cut off

pub mod connection;
pub mod listener;
