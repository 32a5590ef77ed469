//! HTTP front for a stdio MCP server.
//!
//! # Routes
//! ```text
//! sse mode:
//!     GET  /sse                      event stream; first event `endpoint`
//!     POST /messages?session_id=…    one message to stdin (202)
//! streamable-http mode:
//!     POST /mcp                      request → correlated reply; else 202
//!     GET  /mcp                      event stream of all stdout messages
//! both:
//!     GET  /health, /metrics, /.well-known/oauth-protected-resource
//! ```
//!
//! The process is a single MCP session shared by every connected client.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::deployer::{WorkloadHandle, WorkloadSpec};
use crate::middleware::{handler, MiddlewareChain};
use crate::net::connection::{SessionGuard, SessionId, SessionTracker};
use crate::net::listener::{self, ServerHandle};
use crate::observability::tracing::http_trace_layer;
use crate::transport::bridge::{classify, BridgeError, MessageKind, StdioBridge};
use crate::transport::http::PROTECTED_RESOURCE_PATH;
use crate::transport::state::StateCell;
use crate::transport::{
    deploy, release, stop_backend, ProxyMode, Transport, TransportConfig, TransportError, TransportKind,
    TransportState,
};

struct Running {
    server: ServerHandle,
    handle: WorkloadHandle,
    bridge: Arc<StdioBridge>,
    closing: CancellationToken,
    monitor: Option<JoinHandle<()>>,
}

pub struct StdioTransport {
    config: TransportConfig,
    mode: Mutex<ProxyMode>,
    state: Arc<StateCell>,
    running: Mutex<Option<Running>>,
}

impl StdioTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            mode: Mutex::new(config.proxy_mode),
            config,
            state: Arc::new(StateCell::new()),
            running: Mutex::new(None),
        }
    }

    /// Choose how the process is exposed. Takes effect on the next start.
    pub fn set_proxy_mode(&self, mode: ProxyMode) {
        *self.mode.lock().expect("transport mutex poisoned") = mode;
    }

    pub fn proxy_mode(&self) -> ProxyMode {
        *self.mode.lock().expect("transport mutex poisoned")
    }

    async fn launch(&self, mut spec: WorkloadSpec, cancel: &CancellationToken) -> Result<Running, TransportError> {
        spec.transport = TransportKind::Stdio;
        spec.target_host = None;
        spec.target_port = None;

        let (mut deployment, guard) = deploy(&self.config, &spec, cancel).await?;
        let Some(pipes) = deployment.stdio.take() else {
            release(&self.config, guard).await;
            return Err(TransportError::MissingStdio(spec.name));
        };
        let bridge = Arc::new(StdioBridge::spawn(&spec.name, pipes));

        let listener = match listener::bind(&self.config.host, self.config.proxy_port).await {
            Ok(listener) => listener,
            Err(e) => {
                bridge.close().await;
                release(&self.config, guard).await;
                return Err(e);
            }
        };

        let mode = self.proxy_mode();
        let closing = CancellationToken::new();
        let app = self.app(&spec.name, mode, Arc::clone(&bridge), closing.clone());
        let server = match ServerHandle::spawn(listener, app) {
            Ok(server) => server,
            Err(e) => {
                bridge.close().await;
                release(&self.config, guard).await;
                return Err(e);
            }
        };

        tracing::info!(
            workload = %spec.name,
            proxy_mode = %mode,
            address = %server.local_addr(),
            "Stdio transport running"
        );

        Ok(Running {
            server,
            handle: guard.disarm(),
            bridge,
            closing,
            monitor: None,
        })
    }

    fn app(&self, workload: &str, mode: ProxyMode, bridge: Arc<StdioBridge>, closing: CancellationToken) -> Router {
        let state = Arc::new(BridgeState {
            workload: Arc::from(workload),
            mode,
            bridge,
            sessions: SessionTracker::new(workload),
            closing,
            request_timeout: self.config.timeouts.request,
        });

        let mut routes = Router::new().route("/health", get(health));
        routes = match mode {
            ProxyMode::Sse => routes
                .route("/sse", get(open_sse))
                .route("/messages", axum::routing::post(post_message)),
            ProxyMode::StreamableHttp => routes.route("/mcp", get(open_stream).post(post_mcp)),
        };
        let mut routes = routes.with_state(state);

        if let Some(prometheus) = self.config.metrics.clone() {
            routes = routes.route(
                "/metrics",
                get(move || {
                    let prometheus = prometheus.clone();
                    async move {
                        (
                            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                            prometheus.render(),
                        )
                    }
                }),
            );
        }
        if let Some(document) = self.config.auth_info.clone() {
            routes = routes.route(
                PROTECTED_RESOURCE_PATH,
                get(move || {
                    let document = document.clone();
                    async move { Json(document) }
                }),
            );
        }

        let root = MiddlewareChain::new(self.config.middlewares.clone()).apply(handler(routes));
        Router::new()
            .fallback_service(root)
            .layer(http_trace_layer(self.config.debug))
    }
}

struct BridgeState {
    workload: Arc<str>,
    mode: ProxyMode,
    bridge: Arc<StdioBridge>,
    sessions: SessionTracker,
    closing: CancellationToken,
    request_timeout: Duration,
}

impl BridgeState {
    /// Stdout messages as `message` events until the transport stops.
    fn message_events(&self, session: SessionGuard) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
        let workload = Arc::clone(&self.workload);
        let closing = self.closing.clone();
        let exited = self.bridge.exited().clone();
        let done = async move {
            tokio::select! {
                _ = closing.cancelled() => {}
                _ = exited.cancelled() => {}
            }
        };

        BroadcastStream::new(self.bridge.subscribe())
            .filter_map(move |item| {
                let session = &session;
                let event = match item {
                    Ok(message) => Some(Ok(Event::default()
                        .event("message")
                        .data(String::from_utf8_lossy(&message)))),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            workload = %workload,
                            session_id = %session.id(),
                            skipped,
                            "Slow client skipped messages"
                        );
                        None
                    }
                };
                std::future::ready(event)
            })
            .take_until(done)
    }
}

fn json_error(status: StatusCode, error: &str, details: impl Into<String>) -> Response {
    let details: String = details.into();
    (status, Json(serde_json::json!({ "error": error, "details": details }))).into_response()
}

async fn health(State(state): State<Arc<BridgeState>>) -> Response {
    let alive = !state.bridge.exited().is_cancelled();
    let body = Json(serde_json::json!({
        "status": if alive { "ok" } else { "backend-exited" },
        "workload": &*state.workload,
        "transport": "stdio",
        "proxy_mode": state.mode.to_string(),
        "sessions": state.sessions.active_count(),
    }));
    let status = if alive { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, body).into_response()
}

async fn open_sse(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    let session = state.sessions.open();
    let endpoint = format!("/messages?session_id={}", session.id());
    let first = stream::once(std::future::ready(Ok::<_, Infallible>(
        Event::default().event("endpoint").data(endpoint),
    )));
    Sse::new(first.chain(state.message_events(session))).keep_alive(KeepAlive::default())
}

async fn open_stream(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    let session = state.sessions.open();
    Sse::new(state.message_events(session)).keep_alive(KeepAlive::default())
}

#[derive(Deserialize)]
struct SessionQuery {
    session_id: String,
}

async fn post_message(
    State(state): State<Arc<BridgeState>>,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> Response {
    if !state.sessions.contains(&SessionId::parse(&query.session_id)) {
        return json_error(StatusCode::NOT_FOUND, "Unknown session", query.session_id);
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return json_error(StatusCode::BAD_REQUEST, "Empty message", "request body is empty");
    }
    match state.bridge.send(body).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => json_error(StatusCode::BAD_GATEWAY, "Backend unavailable", e.to_string()),
    }
}

async fn post_mcp(State(state): State<Arc<BridgeState>>, body: Bytes) -> Response {
    if body.iter().all(u8::is_ascii_whitespace) {
        return json_error(StatusCode::BAD_REQUEST, "Empty message", "request body is empty");
    }

    let MessageKind::Request(id) = classify(&body) else {
        return match state.bridge.send(body).await {
            Ok(()) => StatusCode::ACCEPTED.into_response(),
            Err(e) => json_error(StatusCode::BAD_GATEWAY, "Backend unavailable", e.to_string()),
        };
    };

    let mut reply = match state.bridge.expect_response(&id) {
        Ok(reply) => reply,
        Err(e @ BridgeError::DuplicateId(_)) => {
            return json_error(StatusCode::CONFLICT, "Duplicate request id", e.to_string())
        }
        Err(e) => return json_error(StatusCode::BAD_GATEWAY, "Backend unavailable", e.to_string()),
    };
    if let Err(e) = state.bridge.send(body).await {
        return json_error(StatusCode::BAD_GATEWAY, "Backend unavailable", e.to_string());
    }

    tokio::select! {
        biased;
        answer = reply.recv() => match answer {
            Some(message) => ([(header::CONTENT_TYPE, "application/json")], message).into_response(),
            None => json_error(StatusCode::BAD_GATEWAY, "Backend exited", "no response before the backend closed"),
        },
        _ = state.bridge.exited().cancelled() => {
            json_error(StatusCode::BAD_GATEWAY, "Backend exited", "no response before the backend closed")
        }
        _ = tokio::time::sleep(state.request_timeout) => {
            tracing::warn!(workload = %state.workload, id = %id, "No response from backend in time");
            json_error(
                StatusCode::GATEWAY_TIMEOUT,
                "Backend timeout",
                format!("no response to request {id} within {:?}", state.request_timeout),
            )
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
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

        let name = spec.name.clone();
        let running = match self.launch(spec, cancel).await {
            Ok(running) => running,
            Err(e) => {
                self.state.set(TransportState::Failed);
                return Err(e);
            }
        };
        let exited = running.bridge.exited().clone();
        let closing = running.closing.clone();
        *self.running.lock().expect("transport mutex poisoned") = Some(running);
        self.state.set(TransportState::Running);

        // A process that exits on its own fails the transport.
        let state = Arc::clone(&self.state);
        let monitor = tokio::spawn(async move {
            tokio::select! {
                _ = exited.cancelled() => {
                    if state.transition(TransportState::Running, TransportState::Failed).is_ok() {
                        tracing::error!(workload = %name, "Backend process exited unexpectedly");
                    }
                }
                _ = closing.cancelled() => {}
            }
        });

        match self.running.lock().expect("transport mutex poisoned").as_mut() {
            Some(running) => running.monitor = Some(monitor),
            // Stopped while the monitor was being spawned.
            None => monitor.abort(),
        }
        Ok(())
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
        let Some(mut running) = running else {
            self.state.set(TransportState::Stopped);
            return Ok(());
        };

        running.closing.cancel();
        if let Some(monitor) = running.monitor.take() {
            monitor.abort();
        }
        running.server.shutdown(self.config.timeouts.drain).await;

        let result = stop_backend(&self.config, &running.handle, cancel).await;
        running.bridge.close().await;

        match result {
            Ok(()) => {
                self.state.set(TransportState::Stopped);
                tracing::info!(handle = %running.handle, "Stdio transport stopped");
                Ok(())
            }
            Err(e) => {
                self.state.set(TransportState::Failed);
                Err(e)
            }
        }
    }
}
