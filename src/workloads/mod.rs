//! Workload lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! run(spec, transport config)
//!     → reserve name (pending) → join group → factory.create
//!     → transport.start (starting → running)
//!     → on any failure: drop reservation, leave group
//!
//! delete_workloads(names)
//!     → one task per name → DeletionBatch::wait → AggregateError
//! ```
//!
//! # Design Decisions
//! - The manager is the only writer of workload status
//! - Operations on one name are serialized; different names run concurrently
//! - Groups only index names; freeing a workload is always done here

pub mod batch;
pub mod manager;
pub mod types;

pub use batch::{AggregateError, DeletionBatch, WorkloadFailure};
pub use manager::WorkloadManager;
pub use types::{Workload, WorkloadError, WorkloadStatus};

/// Longest accepted workload or group name.
pub const MAX_NAME_LEN: usize = 63;

/// Names are 1–63 characters of ASCII letters, digits, `.`, `_` and `-`.
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name must not be empty".to_string());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(format!("name {name} is longer than {MAX_NAME_LEN} characters"));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(format!("name {name} contains invalid character {bad:?}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_rules() {
        assert!(validate_name("fetch-1.0_beta").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name("slash/name").is_err());
        assert!(validate_name(&"a".repeat(MAX_NAME_LEN)).is_ok());
        assert!(validate_name(&"a".repeat(MAX_NAME_LEN + 1)).is_err());
    }
}
