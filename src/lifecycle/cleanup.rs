//! Cascading group removal.

use tokio_util::sync::CancellationToken;

use crate::groups::GroupManager;
use crate::workloads::{AggregateError, WorkloadManager};

#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    /// The group record is gone but some members could not be deleted.
    #[error("group {group}: {source}")]
    Members {
        group: String,
        #[source]
        source: AggregateError,
    },
}

/// Delete every member of `name` concurrently, then the group itself.
///
/// The group is closed to new members first, so nothing can join between the
/// member snapshot and the removal. The group record is removed even when some
/// members fail; those failures are returned. A missing group is a no-op.
pub async fn delete_group(
    groups: &GroupManager,
    workloads: &WorkloadManager,
    name: &str,
    cancel: &CancellationToken,
) -> Result<(), CleanupError> {
    let Some(members) = groups.close(name) else {
        tracing::debug!(group = %name, "Delete of absent group");
        return Ok(());
    };
    tracing::info!(group = %name, members = members.len(), "Deleting group");

    let result = workloads.delete_workloads(&members, cancel).wait().await;
    groups.delete(name);

    result.map_err(|source| {
        tracing::warn!(group = %name, failed = source.len(), "Group deleted with member failures");
        CleanupError::Members {
            group: name.to_string(),
            source,
        }
    })
}
