//! Scoped ownership of a freshly started backend.
//!
//! A transport starts its backend before binding a listener. If anything
//! between those two points fails, or the start future is dropped, the guard
//! stops the backend so nothing is left running unregistered.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::deployer::{Deployer, DeployerError, WorkloadHandle};

pub struct DeploymentGuard {
    deployer: Arc<dyn Deployer>,
    handle: WorkloadHandle,
    armed: bool,
}

impl DeploymentGuard {
    pub fn new(deployer: Arc<dyn Deployer>, handle: WorkloadHandle) -> Self {
        Self {
            deployer,
            handle,
            armed: true,
        }
    }

    pub fn handle(&self) -> &WorkloadHandle {
        &self.handle
    }

    /// Hand the backend over to its new owner; nothing is stopped.
    pub fn disarm(mut self) -> WorkloadHandle {
        self.armed = false;
        self.handle.clone()
    }

    /// Stop the backend now and report the outcome.
    pub async fn release(mut self, cancel: &CancellationToken) -> Result<(), DeployerError> {
        self.armed = false;
        tracing::info!(handle = %self.handle, "Stopping backend after failed start");
        self.deployer.stop(&self.handle, cancel).await
    }
}

impl Drop for DeploymentGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        tracing::warn!(handle = %self.handle, "Backend abandoned during start, stopping it");
        let deployer = Arc::clone(&self.deployer);
        let handle = self.handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = deployer.stop(&handle, &CancellationToken::new()).await {
                        tracing::error!(handle = %handle, error = %e, "Failed to stop abandoned backend");
                    }
                });
            }
            Err(_) => {
                tracing::error!(handle = %self.handle, "No runtime available to stop abandoned backend");
            }
        }
    }
}
