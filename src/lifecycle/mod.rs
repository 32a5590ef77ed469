//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Create groups → Launch workloads (fail fast)
//!
//! Shutdown (shutdown.rs + signals.rs):
//!     SIGTERM/SIGINT → cancel root token → stop admin API → delete all workloads
//!
//! Group removal (cleanup.rs):
//!     list members → bulk delete → wait → delete group record
//! ```
//!
//! # Design Decisions
//! - Ordered startup: groups before the workloads that join them
//! - Ordered shutdown: stop accepting admin calls, then tear down workloads
//! - Group removal is best effort and always reports what it could not free

pub mod cleanup;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use cleanup::{delete_group, CleanupError};
pub use shutdown::Shutdown;
pub use startup::{LaunchError, Launcher};
