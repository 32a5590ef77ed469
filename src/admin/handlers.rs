use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::admin::error::Result;
use crate::admin::{AdminError, AdminState};
use crate::config::WorkloadConfig;
use crate::groups::{Group, GroupError};
use crate::lifecycle;
use crate::workloads::{Workload, WorkloadError};

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub uptime_secs: u64,
    pub workloads: usize,
    pub running: usize,
    pub groups: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateGroup {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkDelete {
    pub names: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkDeleted {
    pub deleted: Vec<String>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let workloads = state.workloads.list();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "operational".to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        running: workloads
            .iter()
            .filter(|w| w.status == crate::workloads::WorkloadStatus::Running)
            .count(),
        workloads: workloads.len(),
        groups: state.groups.list().len(),
    })
}

pub async fn list_workloads(State(state): State<AdminState>) -> Json<Vec<Workload>> {
    Json(state.workloads.list())
}

pub async fn get_workload(State(state): State<AdminState>, Path(name): Path<String>) -> Result<Json<Workload>> {
    state
        .workloads
        .get(&name)
        .map(Json)
        .ok_or_else(|| WorkloadError::NotFound(name).into())
}

pub async fn create_workload(
    State(state): State<AdminState>,
    Json(workload): Json<WorkloadConfig>,
) -> Result<(StatusCode, Json<Workload>)> {
    if workload.command.trim().is_empty() {
        return Err(AdminError::BadRequest(format!(
            "workload {}: command must not be empty",
            workload.name
        )));
    }
    let running = state
        .launcher
        .launch(&state.workloads, &workload, &state.cancel)
        .await?;
    Ok((StatusCode::CREATED, Json(running)))
}

pub async fn stop_workload(State(state): State<AdminState>, Path(name): Path<String>) -> Result<Json<Workload>> {
    Ok(Json(state.workloads.stop(&name, &state.cancel).await?))
}

pub async fn delete_workload(State(state): State<AdminState>, Path(name): Path<String>) -> Result<StatusCode> {
    state.workloads.delete_workload(&name, &state.cancel).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_workloads(
    State(state): State<AdminState>,
    Json(request): Json<BulkDelete>,
) -> Result<Json<BulkDeleted>> {
    state
        .workloads
        .delete_workloads(&request.names, &state.cancel)
        .wait()
        .await?;
    Ok(Json(BulkDeleted {
        deleted: request.names,
    }))
}

pub async fn list_groups(State(state): State<AdminState>) -> Json<Vec<Group>> {
    Json(state.groups.list())
}

pub async fn get_group(State(state): State<AdminState>, Path(name): Path<String>) -> Result<Json<Group>> {
    state
        .groups
        .get(&name)
        .map(Json)
        .ok_or_else(|| GroupError::NotFound(name).into())
}

pub async fn create_group(
    State(state): State<AdminState>,
    Json(request): Json<CreateGroup>,
) -> Result<(StatusCode, Json<Group>)> {
    let group = state.groups.create(&request.name)?;
    Ok((StatusCode::CREATED, Json(group)))
}

/// Delete the group and every workload in it.
pub async fn delete_group(State(state): State<AdminState>, Path(name): Path<String>) -> Result<StatusCode> {
    lifecycle::delete_group(&state.groups, &state.workloads, &name, &state.cancel).await?;
    Ok(StatusCode::NO_CONTENT)
}
