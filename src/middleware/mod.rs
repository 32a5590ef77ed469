//! Middleware pipeline.
//!
//! # Data Flow
//! ```text
//! Incoming request
//!     → default chain (config order, first entry outermost)
//!         request-id → audit → telemetry → rate-limit → auth → ...
//!     → named middleware for the matched route (looked up per request)
//!     → route handler (reverse proxy, stdio bridge, /metrics, ...)
//! ```
//!
//! # Design Decisions
//! - A middleware is a function from handler to handler, so it can inspect,
//!   rewrite, short-circuit or post-process
//! - Rejections share one JSON shape and are logged with the stage name
//! - Stages talk to each other only through request/response extensions

pub mod audit;
pub mod auth;
pub mod named;
pub mod rate_limit;
pub mod registry;
pub mod request_id;
pub mod telemetry;

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};

pub use named::NamedMiddlewares;
pub use registry::MiddlewareRegistry;

/// Type-erased request handler every stage wraps.
pub type Handler = BoxCloneSyncService<Request, Response, Infallible>;

/// One stage of the pipeline.
pub trait Middleware: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Produce a handler that runs this stage before (and after) `next`.
    fn wrap(&self, next: Handler) -> Handler;
}

/// Erase a service into a [`Handler`].
pub fn handler<S>(svc: S) -> Handler
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    BoxCloneSyncService::new(svc)
}

/// Ordered list of stages.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    stages: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new(stages: Vec<Arc<dyn Middleware>>) -> Self {
        Self { stages }
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|m| m.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Wrap `inner` so the first stage sees the request first.
    pub fn apply(&self, inner: Handler) -> Handler {
        self.stages.iter().rev().fold(inner, |next, stage| stage.wrap(next))
    }
}

/// Middleware backed by an async function of `(Request, Next)`.
pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

/// Build a named middleware from an async closure.
pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Middleware>
where
    F: Fn(Request, Next) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(FnMiddleware {
        name: name.into(),
        f,
    })
}

impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Request, Next) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn wrap(&self, next: Handler) -> Handler {
        handler(axum::middleware::from_fn::<F, (Request,)>(self.f.clone()).layer(next))
    }
}

/// Marker left on responses produced by a rejecting stage.
#[derive(Debug, Clone)]
pub struct Rejected {
    pub middleware: String,
    pub reason: String,
}

/// Short-circuit response with the shared `{"error","details"}` body.
pub fn rejection(
    middleware: &str,
    status: StatusCode,
    error: &str,
    details: impl Into<String>,
) -> Response {
    let details = details.into();
    tracing::warn!(
        middleware,
        status = status.as_u16(),
        error,
        details = %details,
        "Request rejected"
    );

    let mut response = (
        status,
        Json(serde_json::json!({ "error": error, "details": details })),
    )
        .into_response();
    response.extensions_mut().insert(Rejected {
        middleware: middleware.to_string(),
        reason: details,
    });
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::HeaderValue;
    use tower::ServiceExt;

    fn tagging(name: &'static str) -> Arc<dyn Middleware> {
        from_fn(name, move |mut req: Request, next: Next| async move {
            let seen = req
                .headers()
                .get("x-order")
                .and_then(|v| v.to_str().ok())
                .map(|v| format!("{v},{name}"))
                .unwrap_or_else(|| name.to_string());
            req.headers_mut()
                .insert("x-order", HeaderValue::from_str(&seen).unwrap());
            next.run(req).await
        })
    }

    fn echo_order() -> Handler {
        handler(tower::service_fn(|req: Request| async move {
            let order = req
                .headers()
                .get("x-order")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            Ok::<_, Infallible>(order.into_response())
        }))
    }

    #[tokio::test]
    async fn first_stage_runs_first() {
        let chain = MiddlewareChain::new(vec![tagging("a"), tagging("b"), tagging("c")]);
        assert_eq!(chain.names(), vec!["a", "b", "c"]);

        let svc = chain.apply(echo_order());
        let response = svc
            .oneshot(Request::new(Body::empty()))
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"a,b,c");
    }

    #[tokio::test]
    async fn rejection_short_circuits() {
        let deny = from_fn("deny", |_req: Request, _next: Next| async move {
            rejection("deny", StatusCode::FORBIDDEN, "Forbidden", "nope")
        });
        let chain = MiddlewareChain::new(vec![deny, tagging("never")]);
        let response = chain
            .apply(echo_order())
            .oneshot(Request::new(Body::empty()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.extensions().get::<Rejected>().unwrap().middleware, "deny");
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Forbidden");
        assert_eq!(json["details"], "nope");
    }
}
