//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Deployer call / backend connect:
//!     → timeouts.rs (deadline + cancellation token)
//!     → backoff.rs  (poll a freshly started backend until it accepts TCP)
//! ```
//!
//! # Design Decisions
//! - Every suspending call has both a deadline and a cancellation path
//! - Readiness polling never fails a start on its own; the first proxied
//!   request reports an unreachable backend instead

pub mod backoff;
pub mod timeouts;
