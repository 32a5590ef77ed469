//! Admin API errors rendered as JSON.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::groups::GroupError;
use crate::lifecycle::{CleanupError, LaunchError};
use crate::transport::TransportError;
use crate::workloads::{AggregateError, WorkloadError};

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("missing or invalid admin API key")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Workload(#[from] WorkloadError),

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Cleanup(#[from] CleanupError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

#[derive(Debug, Serialize)]
pub struct FailureBody {
    pub workload: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    workload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failures: Vec<FailureBody>,
}

fn workload_status(e: &WorkloadError) -> StatusCode {
    match e {
        WorkloadError::AlreadyExists(_) => StatusCode::CONFLICT,
        WorkloadError::NotFound(_) | WorkloadError::GroupNotFound { .. } => StatusCode::NOT_FOUND,
        WorkloadError::InvalidName { .. } => StatusCode::BAD_REQUEST,
        WorkloadError::Transport {
            source: TransportError::Unsupported(_),
            ..
        } => StatusCode::BAD_REQUEST,
        WorkloadError::Transport { .. } => StatusCode::BAD_GATEWAY,
        WorkloadError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn group_status(e: &GroupError) -> StatusCode {
    match e {
        GroupError::AlreadyExists(_) | GroupError::Deleting(_) => StatusCode::CONFLICT,
        GroupError::NotFound(_) => StatusCode::NOT_FOUND,
        GroupError::InvalidName { .. } => StatusCode::BAD_REQUEST,
    }
}

fn group_name(e: &GroupError) -> &str {
    match e {
        GroupError::AlreadyExists(name) | GroupError::NotFound(name) | GroupError::Deleting(name) => name,
        GroupError::InvalidName { name, .. } => name,
    }
}

fn failures(aggregate: &AggregateError) -> Vec<FailureBody> {
    aggregate
        .failures
        .iter()
        .map(|f| FailureBody {
            workload: f.name.clone(),
            error: f.error.to_string(),
        })
        .collect()
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let mut body = ErrorBody {
            error: self.to_string(),
            workload: None,
            group: None,
            failures: Vec::new(),
        };

        let status = match &self {
            AdminError::Unauthorized => StatusCode::UNAUTHORIZED,
            AdminError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AdminError::Workload(e) | AdminError::Launch(LaunchError::Workload(e)) => {
                body.workload = Some(e.workload().to_string());
                if let WorkloadError::GroupNotFound { group, .. } = e {
                    body.group = Some(group.clone());
                }
                workload_status(e)
            }
            AdminError::Group(e) | AdminError::Launch(LaunchError::Group(e)) => {
                body.group = Some(group_name(e).to_string());
                group_status(e)
            }
            AdminError::Launch(LaunchError::Middleware { workload, .. })
            | AdminError::Launch(LaunchError::MissingTargetPort(workload)) => {
                body.workload = Some(workload.clone());
                StatusCode::BAD_REQUEST
            }
            AdminError::Cleanup(CleanupError::Members { group, source }) => {
                body.group = Some(group.clone());
                body.failures = failures(source);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AdminError::Aggregate(source) => {
                body.failures = failures(source);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AdminError>;
