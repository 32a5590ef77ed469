//! Audit trail.
//!
//! Emits one structured event per request on the `audit` target with the
//! caller identity and the outcome. Identity comes from the response
//! extensions left by the auth stage, so the audit stage can sit anywhere in
//! the chain.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request};
use axum::middleware::Next;

use crate::middleware::auth::AuthenticatedSubject;
use crate::middleware::request_id::RequestId;
use crate::middleware::{from_fn, Middleware, Rejected};

pub fn middleware(workload: &str) -> Arc<dyn Middleware> {
    let workload: Arc<str> = Arc::from(workload);
    from_fn("audit", move |req: Request, next: Next| {
        let workload = Arc::clone(&workload);
        async move {
            let started = Instant::now();
            let method = req.method().clone();
            let path = req.uri().path().to_string();
            let request_id = req.extensions().get::<RequestId>().map(|r| r.0.clone());
            let peer = req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.to_string());

            let response = next.run(req).await;

            let status = response.status();
            let subject = response
                .extensions()
                .get::<AuthenticatedSubject>()
                .map(|s| s.0.clone());
            let rejected_by = response.extensions().get::<Rejected>().map(|r| r.middleware.clone());
            let outcome = if rejected_by.is_some() {
                "denied"
            } else if status.is_success() {
                "success"
            } else {
                "failure"
            };

            tracing::info!(
                target: "audit",
                workload = %workload,
                method = %method,
                path = %path,
                status = status.as_u16(),
                duration_ms = started.elapsed().as_millis() as u64,
                request_id = request_id.as_deref().unwrap_or("-"),
                peer = peer.as_deref().unwrap_or("-"),
                subject = subject.as_deref().unwrap_or("anonymous"),
                rejected_by = rejected_by.as_deref().unwrap_or("-"),
                outcome,
                "MCP request"
            );

            response
        }
    })
}
