//! Reverse proxy in front of an HTTP-speaking MCP server.
//!
//! # Responsibilities
//! - Deploy the backend with its target host/port
//! - Wait for the backend port to accept connections
//! - Forward every request that is not one of our own routes, streaming
//!   bodies in both directions
//! - Serve `/health`, `/metrics` and the protected resource document
//! - Apply the default chain to everything and named middlewares per route
//!
//! Each client request gets its own backend request, so one slow SSE client
//! never holds up another.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::{header, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use axum::{Json, Router};
use futures_util::StreamExt;
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio_util::sync::CancellationToken;

use crate::deployer::{WorkloadHandle, WorkloadSpec};
use crate::middleware::{handler, Handler, Middleware, MiddlewareChain, NamedMiddlewares};
use crate::net::connection::SessionTracker;
use crate::net::listener::{self, ServerHandle};
use crate::observability::{metrics, tracing::http_trace_layer};
use crate::resilience::backoff::wait_for_tcp;
use crate::transport::headers;
use crate::transport::state::StateCell;
use crate::transport::{
    deploy, release, stop_backend, NamedMiddlewareSupport, Transport, TransportConfig, TransportError,
    TransportKind, TransportState,
};

/// Route names that named middlewares can target.
pub const NAMED_ROUTES: &[&str] = &["proxy", "metrics", "auth-info", "health"];

pub const PROTECTED_RESOURCE_PATH: &str = "/.well-known/oauth-protected-resource";

/// Wire protocol of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMode {
    Sse,
    StreamableHttp,
}

impl HttpMode {
    pub fn kind(self) -> TransportKind {
        match self {
            HttpMode::Sse => TransportKind::Sse,
            HttpMode::StreamableHttp => TransportKind::StreamableHttp,
        }
    }
}

struct Running {
    server: ServerHandle,
    handle: WorkloadHandle,
}

pub struct HttpTransport {
    mode: HttpMode,
    config: TransportConfig,
    state: StateCell,
    named: NamedMiddlewares,
    running: Mutex<Option<Running>>,
}

impl HttpTransport {
    pub fn new(mode: HttpMode, config: TransportConfig) -> Self {
        Self {
            mode,
            config,
            state: StateCell::new(),
            named: NamedMiddlewares::new(),
            running: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> HttpMode {
        self.mode
    }

    async fn launch(&self, mut spec: WorkloadSpec, cancel: &CancellationToken) -> Result<Running, TransportError> {
        spec.transport = self.mode.kind();
        spec.target_host = Some(self.config.target_host.clone());
        spec.target_port = Some(self.config.target_port);

        let (deployment, guard) = deploy(&self.config, &spec, cancel).await?;
        let backend = deployment
            .address
            .unwrap_or_else(|| format!("{}:{}", self.config.target_host, self.config.target_port));

        if !wait_for_tcp(&backend, self.config.timeouts.backend_ready, cancel).await {
            tracing::warn!(
                workload = %spec.name,
                backend = %backend,
                waited = ?self.config.timeouts.backend_ready,
                "Backend not accepting connections yet, starting proxy anyway"
            );
        }
        if cancel.is_cancelled() {
            release(&self.config, guard).await;
            return Err(TransportError::Cancelled);
        }

        let listener = match listener::bind(&self.config.host, self.config.proxy_port).await {
            Ok(listener) => listener,
            Err(e) => {
                release(&self.config, guard).await;
                return Err(e);
            }
        };

        let app = self.app(&spec.name, backend.clone());
        let server = match ServerHandle::spawn(listener, app) {
            Ok(server) => server,
            Err(e) => {
                release(&self.config, guard).await;
                return Err(e);
            }
        };
        tracing::info!(
            workload = %spec.name,
            mode = ?self.mode,
            address = %server.local_addr(),
            backend = %backend,
            "HTTP transport running"
        );

        Ok(Running {
            server,
            handle: guard.disarm(),
        })
    }

    fn app(&self, workload: &str, backend: String) -> Router {
        let proxy = Arc::new(ProxyState {
            workload: Arc::from(workload),
            backend: backend.clone(),
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
            request_timeout: self.config.timeouts.request,
            sessions: SessionTracker::new(workload),
        });

        let health = HealthInfo {
            workload: workload.to_string(),
            transport: self.mode.kind().to_string(),
            backend,
        };
        let mut routes = Router::new().route_service(
            "/health",
            self.named.route("health", route_handler(get(move || {
                let health = health.clone();
                async move { Json(health) }
            }))),
        );

        if let Some(prometheus) = self.config.metrics.clone() {
            routes = routes.route_service(
                "/metrics",
                self.named.route("metrics", route_handler(get(move || {
                    let prometheus = prometheus.clone();
                    async move {
                        (
                            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                            prometheus.render(),
                        )
                    }
                }))),
            );
        }

        if let Some(document) = self.config.auth_info.clone() {
            routes = routes.route_service(
                PROTECTED_RESOURCE_PATH,
                self.named.route("auth-info", route_handler(get(move || {
                    let document = document.clone();
                    async move { Json(document) }
                }))),
            );
        }

        let forward = handler(tower::service_fn(move |req: Request| {
            let proxy = Arc::clone(&proxy);
            async move { Ok::<_, Infallible>(proxy.forward(req).await) }
        }));
        routes = routes.fallback_service(self.named.route("proxy", forward));

        let chain = MiddlewareChain::new(self.config.middlewares.clone());
        let root: Handler = chain.apply(handler(routes));

        Router::new()
            .fallback_service(root)
            .layer(http_trace_layer(self.config.debug))
    }
}

#[derive(Clone, serde::Serialize)]
struct HealthInfo {
    workload: String,
    transport: String,
    backend: String,
}

struct ProxyState {
    workload: Arc<str>,
    backend: String,
    client: Client<HttpConnector, Body>,
    request_timeout: Duration,
    sessions: SessionTracker,
}

impl ProxyState {
    async fn forward(&self, req: Request) -> Response {
        let started = Instant::now();
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let (mut parts, body) = req.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri: Uri = match format!("http://{}{}", self.backend, path_and_query).parse() {
            Ok(uri) => uri,
            Err(e) => {
                return json_error(StatusCode::BAD_GATEWAY, "Invalid backend URI", e.to_string());
            }
        };

        tracing::debug!(
            workload = %self.workload,
            method = %parts.method,
            uri = %uri,
            "Forwarding request"
        );

        parts.uri = uri;
        headers::forward_request_headers(&mut parts.headers, peer);
        let upstream = Request::from_parts(parts, body);

        let sent = tokio::time::timeout(self.request_timeout, self.client.request(upstream)).await;
        let response: hyper::Response<Incoming> = match sent {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::error!(workload = %self.workload, backend = %self.backend, error = %e, "Backend request failed");
                metrics::record_backend_error(&self.workload, "unreachable");
                return json_error(StatusCode::BAD_GATEWAY, "Backend unavailable", e.to_string());
            }
            Err(_) => {
                tracing::error!(
                    workload = %self.workload,
                    backend = %self.backend,
                    timeout = ?self.request_timeout,
                    "Backend request timed out"
                );
                metrics::record_backend_error(&self.workload, "timeout");
                return json_error(
                    StatusCode::GATEWAY_TIMEOUT,
                    "Backend timeout",
                    format!("no response within {:?}", self.request_timeout),
                );
            }
        };

        let (mut parts, body) = response.into_parts();
        headers::strip_hop_by_hop(&mut parts.headers);

        let streaming = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let body = if streaming {
            // Keep the session registered until the client stream ends.
            let session = self.sessions.open();
            parts
                .headers
                .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            Body::from_stream(Body::new(body).into_data_stream().map(move |chunk| {
                let _session = &session;
                chunk
            }))
        } else {
            Body::new(body)
        };

        tracing::debug!(
            workload = %self.workload,
            status = parts.status.as_u16(),
            streaming,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Backend responded"
        );
        Response::from_parts(parts, body)
    }
}

fn route_handler(route: MethodRouter) -> Handler {
    handler(route)
}

fn json_error(status: StatusCode, error: &str, details: String) -> Response {
    (status, Json(serde_json::json!({ "error": error, "details": details }))).into_response()
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        self.mode.kind()
    }

    fn state(&self) -> TransportState {
        self.state.get()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .lock()
            .expect("transport mutex poisoned")
            .as_ref()
            .map(|r| r.server.local_addr())
    }

    fn handle(&self) -> Option<WorkloadHandle> {
        self.running
            .lock()
            .expect("transport mutex poisoned")
            .as_ref()
            .map(|r| r.handle.clone())
    }

    async fn start(&self, spec: WorkloadSpec, cancel: &CancellationToken) -> Result<(), TransportError> {
        self.state
            .transition(TransportState::Created, TransportState::Starting)
            .map_err(|actual| TransportError::InvalidState {
                expected: TransportState::Created,
                actual,
            })?;

        match self.launch(spec, cancel).await {
            Ok(running) => {
                *self.running.lock().expect("transport mutex poisoned") = Some(running);
                self.state.set(TransportState::Running);
                Ok(())
            }
            Err(e) => {
                self.state.set(TransportState::Failed);
                Err(e)
            }
        }
    }

    async fn stop(&self, cancel: &CancellationToken) -> Result<(), TransportError> {
        match self.state.get() {
            TransportState::Created | TransportState::Stopped => return Ok(()),
            // An abandoned start holds nothing: its backend guard already fired.
            TransportState::Starting if self.running.lock().expect("transport mutex poisoned").is_none() => {
                self.state.set(TransportState::Stopped);
                return Ok(());
            }
            TransportState::Running | TransportState::Failed => {}
            actual => {
                return Err(TransportError::InvalidState {
                    expected: TransportState::Running,
                    actual,
                })
            }
        }
        self.state.set(TransportState::Stopping);

        let running = self.running.lock().expect("transport mutex poisoned").take();
        let Some(running) = running else {
            self.state.set(TransportState::Stopped);
            return Ok(());
        };

        running.server.shutdown(self.config.timeouts.drain).await;
        match stop_backend(&self.config, &running.handle, cancel).await {
            Ok(()) => {
                self.state.set(TransportState::Stopped);
                tracing::info!(handle = %running.handle, "HTTP transport stopped");
                Ok(())
            }
            Err(e) => {
                self.state.set(TransportState::Failed);
                Err(e)
            }
        }
    }

    fn named_middlewares(&self) -> Option<&dyn NamedMiddlewareSupport> {
        Some(self)
    }
}

impl NamedMiddlewareSupport for HttpTransport {
    fn set_named_middlewares(&self, middlewares: HashMap<String, Arc<dyn Middleware>>) {
        self.named.replace(middlewares);
    }

    fn attach_named_middleware(&self, route: &str, middleware: Arc<dyn Middleware>) {
        self.named.attach(route, middleware);
    }

    fn named_middleware(&self, route: &str) -> Option<Arc<dyn Middleware>> {
        self.named.get(route)
    }
}
