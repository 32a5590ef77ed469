//! Admin API.
//!
//! Bearer-key protected JSON endpoints that drive the workload and group
//! managers at runtime. `proxy-cli` is the intended client.

pub mod auth;
pub mod error;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::{middleware, Router};
use tokio_util::sync::CancellationToken;

use crate::groups::GroupManager;
use crate::lifecycle::Launcher;
use crate::observability::tracing::http_trace_layer;
use crate::workloads::WorkloadManager;

pub use error::AdminError;

#[derive(Clone)]
pub struct AdminState {
    pub workloads: WorkloadManager,
    pub groups: GroupManager,
    pub launcher: Launcher,
    pub api_key: Arc<str>,
    /// Cancelled on daemon shutdown; in-flight operations observe it.
    pub cancel: CancellationToken,
    pub started_at: Instant,
}

impl AdminState {
    pub fn new(workloads: WorkloadManager, launcher: Launcher, api_key: &str, cancel: CancellationToken) -> Self {
        Self {
            groups: workloads.groups().clone(),
            workloads,
            launcher,
            api_key: Arc::from(api_key),
            cancel,
            started_at: Instant::now(),
        }
    }
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(handlers::get_status))
        .route(
            "/admin/workloads",
            get(handlers::list_workloads)
                .post(handlers::create_workload)
                .delete(handlers::delete_workloads),
        )
        .route(
            "/admin/workloads/{name}",
            get(handlers::get_workload).delete(handlers::delete_workload),
        )
        .route("/admin/workloads/{name}/stop", post(handlers::stop_workload))
        .route(
            "/admin/groups",
            get(handlers::list_groups).post(handlers::create_group),
        )
        .route(
            "/admin/groups/{name}",
            get(handlers::get_group).delete(handlers::delete_group),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key))
        .layer(http_trace_layer(false))
        .with_state(state)
}
