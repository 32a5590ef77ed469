//! Concurrent bulk deletion results.

use std::fmt;

use tokio::task::JoinHandle;

use crate::workloads::WorkloadError;

/// One workload that could not be deleted.
#[derive(Debug)]
pub struct WorkloadFailure {
    pub name: String,
    pub error: WorkloadError,
}

/// Every failure of a bulk operation, in submission order.
#[derive(Debug, thiserror::Error)]
pub struct AggregateError {
    pub failures: Vec<WorkloadFailure>,
}

impl AggregateError {
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.name.as_str())
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} workload(s) failed", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{}: {}", failure.name, failure.error)?;
        }
        Ok(())
    }
}

/// Handle on a set of deletions already running in the background.
///
/// Dropping the batch does not cancel the deletions.
#[derive(Debug)]
pub struct DeletionBatch {
    tasks: Vec<(String, JoinHandle<Result<(), WorkloadError>>)>,
}

impl DeletionBatch {
    pub(crate) fn new(tasks: Vec<(String, JoinHandle<Result<(), WorkloadError>>)>) -> Self {
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every deletion. `Ok` only if all of them succeeded.
    pub async fn wait(self) -> Result<(), AggregateError> {
        let mut failures = Vec::new();
        for (name, task) in self.tasks {
            let error = match task.await {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(join) => {
                    tracing::error!(workload = %name, error = %join, "Deletion task panicked");
                    WorkloadError::Cancelled(name.clone())
                }
            };
            failures.push(WorkloadFailure { name, error });
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AggregateError { failures })
        }
    }
}
