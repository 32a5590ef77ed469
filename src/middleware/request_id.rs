//! Request correlation IDs.
//!
//! Keeps a caller-supplied `x-request-id` when it is sane, otherwise assigns a
//! UUID v4. The ID is echoed on the response and forwarded to the backend.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use uuid::Uuid;

use crate::middleware::{from_fn, Middleware};

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

const MAX_INBOUND_LEN: usize = 128;

/// Request ID stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

pub fn middleware() -> Arc<dyn Middleware> {
    from_fn("request-id", |mut req: Request, next: Next| async move {
        let id = req
            .headers()
            .get(&X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty() && v.len() <= MAX_INBOUND_LEN)
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let value = HeaderValue::from_str(&id).ok();
        if let Some(value) = &value {
            req.headers_mut().insert(X_REQUEST_ID.clone(), value.clone());
        }
        req.extensions_mut().insert(RequestId(id));

        let mut response = next.run(req).await;
        if let Some(value) = value {
            response.headers_mut().insert(X_REQUEST_ID.clone(), value);
        }
        response
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{handler, MiddlewareChain};
    use axum::body::Body;
    use axum::response::IntoResponse;
    use std::convert::Infallible;
    use tower::ServiceExt;

    fn echo_extension() -> crate::middleware::Handler {
        handler(tower::service_fn(|req: Request| async move {
            let id = req.extensions().get::<RequestId>().map(|r| r.0.clone()).unwrap_or_default();
            Ok::<_, Infallible>(id.into_response())
        }))
    }

    #[tokio::test]
    async fn assigns_id_when_missing() {
        let svc = MiddlewareChain::new(vec![middleware()]).apply(echo_extension());
        let response = svc.oneshot(Request::new(Body::empty())).await.unwrap();
        let header = response.headers().get(&X_REQUEST_ID).unwrap().to_str().unwrap().to_string();
        assert!(Uuid::parse_str(&header).is_ok());

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body, header.as_bytes());
    }

    #[tokio::test]
    async fn keeps_inbound_id() {
        let svc = MiddlewareChain::new(vec![middleware()]).apply(echo_extension());
        let request = Request::builder()
            .header("x-request-id", "abc-123")
            .body(Body::empty())
            .unwrap();
        let response = svc.oneshot(request).await.unwrap();
        assert_eq!(response.headers()["x-request-id"], "abc-123");
    }
}
