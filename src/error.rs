//! Crate-wide error type.

use crate::config::ConfigError;
use crate::deployer::DeployerError;
use crate::groups::GroupError;
use crate::lifecycle::{CleanupError, LaunchError};
use crate::middleware::auth::AuthError;
use crate::observability::metrics::MetricsError;
use crate::transport::TransportError;
use crate::workloads::{AggregateError, WorkloadError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Deployer(#[from] DeployerError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Workload(#[from] WorkloadError),

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Cleanup(#[from] CleanupError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
