//! Local process deployer.
//!
//! Runs each workload as a child process of the gateway:
//! - stdio workloads get piped stdin/stdout handed to the transport
//! - HTTP workloads are told where to listen through `MCP_HOST`/`MCP_PORT`
//! - stderr is always captured and forwarded to the log

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio_util::sync::CancellationToken;

use crate::deployer::{Deployer, DeployerError, Deployment, StdioPipes, WorkloadHandle, WorkloadSpec};
use crate::transport::TransportKind;

/// Deploys workloads as local child processes.
#[derive(Default)]
pub struct ProcessDeployer {
    children: Mutex<HashMap<WorkloadHandle, Child>>,
}

impl ProcessDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of processes currently owned by this deployer.
    pub fn running(&self) -> usize {
        self.children.lock().expect("process table mutex poisoned").len()
    }
}

#[async_trait]
impl Deployer for ProcessDeployer {
    async fn start(
        &self,
        spec: &WorkloadSpec,
        cancel: &CancellationToken,
    ) -> Result<Deployment, DeployerError> {
        if cancel.is_cancelled() {
            return Err(DeployerError::Cancelled);
        }
        if spec.command.trim().is_empty() {
            return Err(DeployerError::Spawn {
                name: spec.name.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            });
        }

        let stdio_workload = spec.transport == TransportKind::Stdio;

        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if stdio_workload {
            cmd.stdin(Stdio::piped()).stdout(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null()).stdout(Stdio::null());
            if let Some(host) = &spec.target_host {
                cmd.env("MCP_HOST", host);
            }
            if let Some(port) = spec.target_port {
                cmd.env("MCP_PORT", port.to_string());
            }
        }

        let mut child = cmd.spawn().map_err(|source| DeployerError::Spawn {
            name: spec.name.clone(),
            source,
        })?;

        let pid = child.id().unwrap_or_default();
        let handle = WorkloadHandle::new(format!("proc-{}-{}", spec.name, pid));

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(spec.name.clone(), stderr));
        }

        let stdio = if stdio_workload {
            let stdin = child.stdin.take();
            let stdout = child.stdout.take();
            match (stdin, stdout) {
                (Some(stdin), Some(stdout)) => Some(StdioPipes {
                    stdin: Box::new(stdin),
                    stdout: Box::new(stdout),
                }),
                _ => {
                    let _ = child.kill().await;
                    return Err(DeployerError::Spawn {
                        name: spec.name.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::BrokenPipe,
                            "child process has no stdio pipes",
                        ),
                    });
                }
            }
        } else {
            None
        };

        let address = match (stdio_workload, &spec.target_host, spec.target_port) {
            (false, Some(host), Some(port)) => Some(format!("{host}:{port}")),
            _ => None,
        };

        tracing::info!(
            workload = %spec.name,
            pid,
            command = %spec.command,
            transport = %spec.transport,
            "Process started"
        );

        self.children
            .lock()
            .expect("process table mutex poisoned")
            .insert(handle.clone(), child);

        Ok(Deployment {
            handle,
            address,
            stdio,
        })
    }

    async fn stop(
        &self,
        handle: &WorkloadHandle,
        cancel: &CancellationToken,
    ) -> Result<(), DeployerError> {
        let child = self
            .children
            .lock()
            .expect("process table mutex poisoned")
            .remove(handle);
        let Some(mut child) = child else {
            return Err(DeployerError::NotFound(handle.clone()));
        };

        if let Ok(Some(status)) = child.try_wait() {
            tracing::info!(handle = %handle, %status, "Process already exited");
            return Ok(());
        }

        tokio::select! {
            result = child.kill() => match result {
                Ok(()) => {
                    tracing::info!(handle = %handle, "Process stopped");
                    Ok(())
                }
                Err(e) => Err(DeployerError::Stop {
                    handle: handle.clone(),
                    reason: e.to_string(),
                }),
            },
            _ = cancel.cancelled() => {
                // kill_on_drop still reaps the child when it is dropped here.
                Err(DeployerError::Cancelled)
            }
        }
    }
}

async fn forward_stderr(workload: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(workload = %workload, "stderr: {}", line);
    }
}
