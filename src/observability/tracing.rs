//! Request spans for transport listeners.

use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

pub type HttpTraceLayer = TraceLayer<SharedClassifier<ServerErrorsAsFailures>>;

/// Debug workloads log every request at INFO with headers; others at DEBUG.
pub fn http_trace_layer(debug: bool) -> HttpTraceLayer {
    let level = if debug { Level::INFO } else { Level::DEBUG };
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(level).include_headers(debug))
        .on_request(DefaultOnRequest::new().level(level))
        .on_response(DefaultOnResponse::new().level(level).include_headers(debug))
}
