//! Per-workload request metrics.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;

use crate::middleware::{from_fn, Middleware};
use crate::observability::metrics;

pub fn middleware(workload: &str) -> Arc<dyn Middleware> {
    let workload: Arc<str> = Arc::from(workload);
    from_fn("telemetry", move |req: Request, next: Next| {
        let workload = Arc::clone(&workload);
        async move {
            let started = Instant::now();
            let method = req.method().to_string();
            let response = next.run(req).await;
            metrics::record_request(&workload, &method, response.status().as_u16(), started);
            response
        }
    })
}
