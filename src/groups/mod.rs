//! Workload groups.
//!
//! A group is a named index of workload names. It never owns the workloads:
//! deleting a group record frees nothing, and tearing members down is the
//! job of `lifecycle::cleanup::delete_group` through the workload manager.

pub mod manager;

pub use manager::{Group, GroupError, GroupManager};
