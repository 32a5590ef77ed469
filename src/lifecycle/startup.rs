//! Startup orchestration.
//!
//! # Responsibilities
//! - Turn a [`WorkloadConfig`] into a deployer spec plus a transport config
//! - Create configured groups before any workload joins them
//! - Launch configured workloads in order, failing fast
//!
//! The admin API reuses the same [`Launcher`] for workloads created at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{GatewayConfig, WorkloadConfig};
use crate::deployer::{Deployer, WorkloadSpec};
use crate::groups::{GroupError, GroupManager};
use crate::middleware::registry::{MiddlewareRegistry, UnknownMiddleware};
use crate::transport::{TransportConfig, TransportTimeouts};
use crate::workloads::{Workload, WorkloadError, WorkloadManager};

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("workload {workload}: {source}")]
    Middleware {
        workload: String,
        #[source]
        source: UnknownMiddleware,
    },

    #[error("workload {0}: target_port is required for HTTP transports")]
    MissingTargetPort(String),

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Workload(#[from] WorkloadError),
}

/// Builds transports for workloads from their configuration.
#[derive(Clone)]
pub struct Launcher {
    deployer: Arc<dyn Deployer>,
    registry: MiddlewareRegistry,
    metrics: Option<PrometheusHandle>,
    timeouts: TransportTimeouts,
}

impl Launcher {
    pub fn new(deployer: Arc<dyn Deployer>, registry: MiddlewareRegistry, timeouts: TransportTimeouts) -> Self {
        Self {
            deployer,
            registry,
            metrics: None,
            timeouts,
        }
    }

    /// Serve this registry on each transport's `/metrics` route.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn spec(&self, workload: &WorkloadConfig) -> WorkloadSpec {
        WorkloadSpec {
            name: workload.name.clone(),
            group: workload.group.clone(),
            command: workload.command.clone(),
            args: workload.args.clone(),
            env: workload.env.clone(),
            transport: workload.transport.clone(),
            target_host: None,
            target_port: None,
        }
    }

    pub fn transport_config(&self, workload: &WorkloadConfig) -> Result<TransportConfig, LaunchError> {
        let resolve_err = |source| LaunchError::Middleware {
            workload: workload.name.clone(),
            source,
        };

        let target_port = match (workload.transport.is_http(), workload.target_port) {
            (true, None) => return Err(LaunchError::MissingTargetPort(workload.name.clone())),
            (_, port) => port.unwrap_or(0),
        };

        let middlewares = self
            .registry
            .resolve_all(&workload.middlewares, &workload.name)
            .map_err(resolve_err)?;

        let mut named = HashMap::new();
        for (route, middleware) in &workload.named_middlewares {
            let resolved = self
                .registry
                .resolve(middleware, &workload.name)
                .map_err(resolve_err)?;
            named.insert(route.clone(), resolved);
        }

        let mut config = TransportConfig::new(workload.transport.clone(), Arc::clone(&self.deployer));
        config.host = workload.host.clone();
        config.proxy_port = workload.proxy_port;
        config.target_host = workload.target_host.clone();
        config.target_port = target_port;
        config.debug = workload.debug;
        config.middlewares = middlewares;
        config.named_middlewares = named;
        config.metrics = self.metrics.clone();
        config.auth_info = workload.auth_info.clone();
        config.proxy_mode = workload.proxy_mode;
        config.timeouts = self.timeouts;
        Ok(config)
    }

    pub async fn launch(
        &self,
        manager: &WorkloadManager,
        workload: &WorkloadConfig,
        cancel: &CancellationToken,
    ) -> Result<Workload, LaunchError> {
        let config = self.transport_config(workload)?;
        Ok(manager.run(self.spec(workload), config, cancel).await?)
    }

    /// Create configured groups, then launch every configured workload.
    ///
    /// On the first failure the workloads already launched are deleted again
    /// and the error is returned.
    pub async fn launch_all(
        &self,
        config: &GatewayConfig,
        groups: &GroupManager,
        manager: &WorkloadManager,
        cancel: &CancellationToken,
    ) -> Result<Vec<Workload>, LaunchError> {
        for group in &config.groups {
            groups.ensure(group)?;
        }

        let mut launched = Vec::with_capacity(config.workloads.len());
        for workload in &config.workloads {
            match self.launch(manager, workload, cancel).await {
                Ok(running) => launched.push(running),
                Err(e) => {
                    tracing::error!(workload = %workload.name, error = %e, "Startup launch failed");
                    let names: Vec<String> = launched.iter().map(|w: &Workload| w.name.clone()).collect();
                    if let Err(cleanup) = manager.delete_workloads(&names, &CancellationToken::new()).wait().await {
                        tracing::error!(error = %cleanup, "Failed to roll back started workloads");
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(groups = config.groups.len(), workloads = launched.len(), "Startup complete");
        Ok(launched)
    }
}
