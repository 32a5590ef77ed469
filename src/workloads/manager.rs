//! Workload registry and lifecycle operations.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::deployer::WorkloadSpec;
use crate::groups::GroupManager;
use crate::observability::metrics;
use crate::transport::{Transport, TransportConfig, TransportError, TransportFactory, TransportState};
use crate::workloads::{validate_name, DeletionBatch, Workload, WorkloadError, WorkloadStatus};

struct Tracked {
    workload: Workload,
    transport: Option<Arc<dyn Transport>>,
}

struct Inner {
    records: DashMap<String, Tracked>,
    /// Per-name operation locks. Entries only live while someone holds them.
    ops: DashMap<String, Arc<Mutex<()>>>,
    groups: GroupManager,
    factory: TransportFactory,
}

/// Owns every workload and the transport in front of it.
#[derive(Clone)]
pub struct WorkloadManager {
    inner: Arc<Inner>,
}

struct OpGuard<'a> {
    ops: &'a DashMap<String, Arc<Mutex<()>>>,
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.ops.remove_if(&self.name, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Record and group membership taken by `run`, undone unless committed.
///
/// Also fires when the `run` future is dropped mid-launch.
struct Reservation<'a> {
    manager: &'a WorkloadManager,
    name: String,
    group: Option<String>,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.manager.forget(&self.name, self.group.as_deref());
            tracing::debug!(workload = %self.name, "Workload reservation rolled back");
        }
    }
}

impl WorkloadManager {
    pub fn new(groups: GroupManager) -> Self {
        Self::with_factory(groups, TransportFactory::new())
    }

    pub fn with_factory(groups: GroupManager, factory: TransportFactory) -> Self {
        Self {
            inner: Arc::new(Inner {
                records: DashMap::new(),
                ops: DashMap::new(),
                groups,
                factory,
            }),
        }
    }

    pub fn groups(&self) -> &GroupManager {
        &self.inner.groups
    }

    async fn lock(&self, name: &str) -> OpGuard<'_> {
        let lock = Arc::clone(self.inner.ops.entry(name.to_string()).or_default().value());
        let guard = lock.lock_owned().await;
        OpGuard {
            ops: &self.inner.ops,
            name: name.to_string(),
            guard: Some(guard),
        }
    }

    fn set_status(&self, name: &str, status: WorkloadStatus) {
        if let Some(mut record) = self.inner.records.get_mut(name) {
            record.workload.status = status;
        }
    }

    fn forget(&self, name: &str, group: Option<&str>) {
        self.inner.records.remove(name);
        if let Some(group) = group {
            self.inner.groups.remove_workload(group, name);
        }
    }

    /// Deploy `spec` behind a new transport built from `config`.
    pub async fn run(
        &self,
        spec: WorkloadSpec,
        config: TransportConfig,
        cancel: &CancellationToken,
    ) -> Result<Workload, WorkloadError> {
        let name = spec.name.clone();
        validate_name(&name).map_err(|reason| WorkloadError::InvalidName {
            name: name.clone(),
            reason,
        })?;

        let _op = self.lock(&name).await;
        if self.inner.records.contains_key(&name) {
            return Err(WorkloadError::AlreadyExists(name));
        }

        let group = spec.group.clone();
        if let Some(group) = &group {
            self.inner
                .groups
                .add_workload(group, &name)
                .map_err(|_| WorkloadError::GroupNotFound {
                    name: name.clone(),
                    group: group.clone(),
                })?;
        }

        let kind = config.kind.clone();
        self.inner.records.insert(
            name.clone(),
            Tracked {
                workload: Workload {
                    name: name.clone(),
                    group: group.clone(),
                    handle: None,
                    status: WorkloadStatus::Pending,
                    created_at: Utc::now(),
                    transport: kind.clone(),
                    proxy_url: None,
                },
                transport: None,
            },
        );
        let reservation = Reservation {
            manager: self,
            name: name.clone(),
            group,
            committed: false,
        };

        let transport = match self.inner.factory.create(config) {
            Ok(transport) => transport,
            Err(source) => {
                metrics::record_workload_event("start_failed");
                return Err(WorkloadError::Transport { name, source });
            }
        };

        if let Some(mut record) = self.inner.records.get_mut(&name) {
            record.workload.status = WorkloadStatus::Starting;
            record.transport = Some(Arc::clone(&transport));
        }

        if let Err(source) = transport.start(spec, cancel).await {
            metrics::record_workload_event("start_failed");
            tracing::warn!(workload = %name, transport = %kind, error = %source, "Workload failed to start");
            return Err(match source {
                TransportError::Cancelled => WorkloadError::Cancelled(name),
                source => WorkloadError::Transport { name, source },
            });
        }

        let mut record = self
            .inner
            .records
            .get_mut(&name)
            .ok_or_else(|| WorkloadError::NotFound(name.clone()))?;
        record.workload.status = WorkloadStatus::Running;
        record.workload.handle = transport.handle();
        record.workload.proxy_url = transport.local_addr().map(|addr| format!("http://{addr}"));
        let workload = record.workload.clone();
        drop(record);
        reservation.commit();

        metrics::record_workload_event("started");
        tracing::info!(
            workload = %name,
            transport = %kind,
            proxy_url = workload.proxy_url.as_deref().unwrap_or("-"),
            "Workload running"
        );
        Ok(workload)
    }

    pub fn get(&self, name: &str) -> Option<Workload> {
        self.inner.records.get(name).map(|r| snapshot(&r))
    }

    /// All workloads sorted by name. A transport that died on its own shows as `error`.
    pub fn list(&self) -> Vec<Workload> {
        let mut workloads: Vec<Workload> = self.inner.records.iter().map(|r| snapshot(&r)).collect();
        workloads.sort_by(|a, b| a.name.cmp(&b.name));
        workloads
    }

    /// Stop the transport and backend; the record stays as `stopped`.
    pub async fn stop(&self, name: &str, cancel: &CancellationToken) -> Result<Workload, WorkloadError> {
        let _op = self.lock(name).await;
        let transport = self
            .inner
            .records
            .get(name)
            .map(|r| r.transport.clone())
            .ok_or_else(|| WorkloadError::NotFound(name.to_string()))?;

        if let Some(transport) = transport {
            self.set_status(name, WorkloadStatus::Stopping);
            if let Err(source) = transport.stop(cancel).await {
                self.set_status(name, WorkloadStatus::Error);
                return Err(WorkloadError::Transport {
                    name: name.to_string(),
                    source,
                });
            }
        }

        let mut record = self
            .inner
            .records
            .get_mut(name)
            .ok_or_else(|| WorkloadError::NotFound(name.to_string()))?;
        record.workload.status = WorkloadStatus::Stopped;
        record.workload.proxy_url = None;
        let workload = record.workload.clone();
        drop(record);

        metrics::record_workload_event("stopped");
        tracing::info!(workload = %name, "Workload stopped");
        Ok(workload)
    }

    /// Stop if needed, then drop the record and its group membership.
    ///
    /// Absent workloads are not an error. The record is removed even when the
    /// stop fails; the failure is still returned.
    pub async fn delete_workload(&self, name: &str, cancel: &CancellationToken) -> Result<(), WorkloadError> {
        let _op = self.lock(name).await;
        let Some((transport, group)) = self
            .inner
            .records
            .get(name)
            .map(|r| (r.transport.clone(), r.workload.group.clone()))
        else {
            tracing::debug!(workload = %name, "Delete of absent workload");
            return Ok(());
        };

        let mut result = Ok(());
        if let Some(transport) = transport {
            if matches!(
                transport.state(),
                TransportState::Running | TransportState::Failed | TransportState::Starting
            ) {
                self.set_status(name, WorkloadStatus::Stopping);
                if let Err(source) = transport.stop(cancel).await {
                    tracing::error!(workload = %name, error = %source, "Failed to stop workload during delete");
                    result = Err(match source {
                        TransportError::Cancelled => WorkloadError::Cancelled(name.to_string()),
                        source => WorkloadError::Transport {
                            name: name.to_string(),
                            source,
                        },
                    });
                }
            }
        }

        self.forget(name, group.as_deref());
        metrics::record_workload_event("deleted");
        tracing::info!(workload = %name, "Workload deleted");
        result
    }

    /// Delete every name concurrently, one task each. Duplicates are deleted once.
    pub fn delete_workloads(&self, names: &[String], cancel: &CancellationToken) -> DeletionBatch {
        let mut seen = HashSet::new();
        let tasks = names
            .iter()
            .filter(|name| seen.insert(name.as_str()))
            .map(|name| {
                let manager = self.clone();
                let cancel = cancel.clone();
                let owned = name.clone();
                let task = tokio::spawn(async move { manager.delete_workload(&owned, &cancel).await });
                (name.clone(), task)
            })
            .collect();
        DeletionBatch::new(tasks)
    }

    /// Delete everything; used on daemon shutdown.
    pub async fn stop_all(&self, cancel: &CancellationToken) -> Result<(), crate::workloads::AggregateError> {
        let names: Vec<String> = self.inner.records.iter().map(|r| r.key().clone()).collect();
        if names.is_empty() {
            return Ok(());
        }
        tracing::info!(count = names.len(), "Stopping all workloads");
        self.delete_workloads(&names, cancel).wait().await
    }
}

fn snapshot(tracked: &Tracked) -> Workload {
    let mut workload = tracked.workload.clone();
    if workload.status == WorkloadStatus::Running
        && tracked
            .transport
            .as_ref()
            .is_some_and(|t| t.state() == TransportState::Failed)
    {
        workload.status = WorkloadStatus::Error;
    }
    workload
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::deployer::{Deployer, DeployerError, Deployment, WorkloadHandle};

    struct Unavailable;

    #[async_trait]
    impl Deployer for Unavailable {
        async fn start(&self, _: &WorkloadSpec, _: &CancellationToken) -> Result<Deployment, DeployerError> {
            Err(DeployerError::Unavailable("test".into()))
        }

        async fn stop(&self, handle: &WorkloadHandle, _: &CancellationToken) -> Result<(), DeployerError> {
            Err(DeployerError::NotFound(handle.clone()))
        }
    }

    fn config() -> TransportConfig {
        TransportConfig::new("stdio", Arc::new(Unavailable))
    }

    #[tokio::test]
    async fn rejects_bad_names_and_missing_groups() {
        let manager = WorkloadManager::new(GroupManager::new());
        let cancel = CancellationToken::new();

        let err = manager
            .run(WorkloadSpec::new("bad name", "x"), config(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkloadError::InvalidName { .. }));

        let err = manager
            .run(WorkloadSpec::new("w", "x").with_group("nope"), config(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkloadError::GroupNotFound { .. }));
        assert!(manager.get("w").is_none());
    }

    #[tokio::test]
    async fn failed_start_rolls_back() {
        let groups = GroupManager::new();
        groups.create("g").unwrap();
        let manager = WorkloadManager::new(groups.clone());
        let cancel = CancellationToken::new();

        let err = manager
            .run(WorkloadSpec::new("w", "x").with_group("g"), config(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkloadError::Transport { .. }));
        assert_eq!(err.workload(), "w");
        assert!(manager.get("w").is_none());
        assert!(groups.list_workloads_in_group("g").is_empty());
        assert!(manager.inner.ops.is_empty());
    }

    #[tokio::test]
    async fn unsupported_transport_is_reported() {
        let manager = WorkloadManager::new(GroupManager::new());
        let config = TransportConfig::new("inspector", Arc::new(Unavailable));
        let err = manager
            .run(WorkloadSpec::new("w", "x"), config, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkloadError::Transport {
                source: TransportError::Unsupported(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn deleting_absent_workloads_succeeds() {
        let manager = WorkloadManager::new(GroupManager::new());
        let cancel = CancellationToken::new();
        manager.delete_workload("ghost", &cancel).await.unwrap();

        let batch = manager.delete_workloads(&["a".into(), "b".into(), "a".into()], &cancel);
        assert_eq!(batch.len(), 2);
        batch.wait().await.unwrap();
        assert!(manager.stop_all(&cancel).await.is_ok());
    }

    #[tokio::test]
    async fn stop_unknown_is_not_found() {
        let manager = WorkloadManager::new(GroupManager::new());
        let err = manager.stop("ghost", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, WorkloadError::NotFound(_)));
    }
}
