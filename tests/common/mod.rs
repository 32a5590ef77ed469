//! Shared utilities for integration tests: a scriptable deployer and mock
//! MCP backends.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::{header, HeaderMap};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mcp_gateway::deployer::{Deployer, DeployerError, Deployment, StdioPipes, WorkloadHandle, WorkloadSpec};
use mcp_gateway::transport::TransportKind;

/// In-memory deployer. Stdio workloads are answered by an echo task that
/// replies to every JSON-RPC request with `{"result": {"echo": params}}`
/// and re-emits every notification as `notifications/echo`.
#[derive(Default)]
pub struct MockDeployer {
    starts: Mutex<Vec<WorkloadSpec>>,
    stops: Mutex<Vec<WorkloadHandle>>,
    fail_start: Mutex<HashSet<String>>,
    fail_stop: Mutex<HashSet<String>>,
    backends: Mutex<HashMap<WorkloadHandle, JoinHandle<()>>>,
    start_gate: Mutex<Option<Arc<Semaphore>>>,
    stop_gate: Mutex<Option<Arc<Semaphore>>>,
    next: AtomicU32,
}

impl MockDeployer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_start(&self, workload: &str) {
        self.fail_start.lock().unwrap().insert(workload.to_string());
    }

    pub fn fail_stop(&self, workload: &str) {
        self.fail_stop.lock().unwrap().insert(workload.to_string());
    }

    /// Park every later start after it is recorded, until permits are added.
    pub fn hold_starts(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.start_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Park every later stop after it is recorded, until permits are added.
    pub fn hold_stops(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.stop_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn starts(&self) -> Vec<WorkloadSpec> {
        self.starts.lock().unwrap().clone()
    }

    pub fn stops(&self) -> Vec<WorkloadHandle> {
        self.stops.lock().unwrap().clone()
    }

    pub fn started(&self, workload: &str) -> usize {
        self.starts().iter().filter(|s| s.name == workload).count()
    }

    pub fn stopped(&self, workload: &str) -> bool {
        self.stops()
            .iter()
            .any(|h| h.as_str().starts_with(&format!("mock-{workload}-")))
    }

    /// Simulate the process dying on its own.
    pub fn crash(&self, handle: &WorkloadHandle) {
        if let Some(task) = self.backends.lock().unwrap().remove(handle) {
            task.abort();
        }
    }
}

#[async_trait]
impl Deployer for MockDeployer {
    async fn start(&self, spec: &WorkloadSpec, _cancel: &CancellationToken) -> Result<Deployment, DeployerError> {
        self.starts.lock().unwrap().push(spec.clone());
        pass_gate(&self.start_gate).await;
        if self.fail_start.lock().unwrap().contains(&spec.name) {
            return Err(DeployerError::Unavailable(format!("refusing to start {}", spec.name)));
        }

        let n = self.next.fetch_add(1, Ordering::SeqCst);
        let handle = WorkloadHandle::new(format!("mock-{}-{n}", spec.name));

        let stdio = if spec.transport == TransportKind::Stdio {
            let (ours, theirs) = tokio::io::duplex(64 * 1024);
            let task = tokio::spawn(echo_server(theirs));
            self.backends.lock().unwrap().insert(handle.clone(), task);
            let (read, write) = tokio::io::split(ours);
            Some(StdioPipes {
                stdin: Box::new(write),
                stdout: Box::new(read),
            })
        } else {
            None
        };

        Ok(Deployment {
            handle,
            address: None,
            stdio,
        })
    }

    async fn stop(&self, handle: &WorkloadHandle, _cancel: &CancellationToken) -> Result<(), DeployerError> {
        self.stops.lock().unwrap().push(handle.clone());
        pass_gate(&self.stop_gate).await;
        let failing = self
            .fail_stop
            .lock()
            .unwrap()
            .iter()
            .any(|name| handle.as_str().starts_with(&format!("mock-{name}-")));
        if failing {
            return Err(DeployerError::Stop {
                handle: handle.clone(),
                reason: "scripted failure".to_string(),
            });
        }
        self.crash(handle);
        Ok(())
    }
}

async fn pass_gate(gate: &Mutex<Option<Arc<Semaphore>>>) {
    let gate = gate.lock().unwrap().clone();
    if let Some(gate) = gate {
        gate.acquire().await.unwrap().forget();
    }
}

/// Poll `check` until it holds, failing the test after five seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn echo_server(io: tokio::io::DuplexStream) {
    let (read, mut write) = tokio::io::split(io);
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let reply = match (message.get("id"), message.get("method")) {
            (Some(id), Some(_)) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "echo": message.get("params").cloned().unwrap_or(Value::Null) },
            }),
            (None, Some(_)) => json!({
                "jsonrpc": "2.0",
                "method": "notifications/echo",
                "params": message,
            }),
            _ => continue,
        };
        let mut out = reply.to_string();
        out.push('\n');
        if write.write_all(out.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// A bound local port that is free again once the listener is dropped.
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Serve `app` on an ephemeral port.
pub async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// HTTP MCP backend:
/// - `GET /echo` describes the request it received
/// - `POST /mcp` answers JSON-RPC requests
/// - `GET /sse` streams `one`, `two`, `three` and ends
/// - `GET /ticks` streams `tick-0` .. `tick-29`, 20ms apart, and ends
pub async fn start_http_backend() -> SocketAddr {
    let app = Router::new()
        .route("/echo", get(describe_request))
        .route("/mcp", post(answer_rpc))
        .route("/sse", get(numbered_events))
        .route("/ticks", get(ticks));
    serve(app).await
}

async fn describe_request(headers: HeaderMap, request: Request) -> Json<Value> {
    let value = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    Json(json!({
        "method": request.method().as_str(),
        "path": request.uri().path(),
        "query": request.uri().query(),
        "x_custom": value("x-custom"),
        "x_forwarded_for": value("x-forwarded-for"),
        "x_forwarded_host": value("x-forwarded-host"),
        "connection": value("connection"),
    }))
}

async fn answer_rpc(Json(message): Json<Value>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        Json(json!({
            "jsonrpc": "2.0",
            "id": message.get("id").cloned().unwrap_or(Value::Null),
            "result": { "method": message.get("method").cloned().unwrap_or(Value::Null) },
        })),
    )
}

async fn numbered_events() -> impl IntoResponse {
    let events = ["one", "two", "three"]
        .into_iter()
        .map(|data| Ok::<_, Infallible>(Event::default().event("message").data(data)));
    Sse::new(stream::iter(events))
}

pub const TICKS: usize = 30;

async fn ticks() -> impl IntoResponse {
    let events = stream::unfold(0usize, |n| async move {
        if n == TICKS {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        let event = Event::default().event("message").data(format!("tick-{n}"));
        Some((Ok::<_, Infallible>(event), n + 1))
    });
    Sse::new(events)
}

/// Incremental reader for a `text/event-stream` response.
pub struct EventReader {
    stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: String,
}

impl EventReader {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            stream: Box::pin(response.bytes_stream()),
            buffer: String::new(),
        }
    }

    /// Next `(event, data)` pair, skipping keep-alive comments.
    pub async fn next(&mut self) -> Option<(String, String)> {
        let read = async {
            loop {
                while let Some(end) = self.buffer.find("\n\n") {
                    let block: String = self.buffer.drain(..end + 2).collect();
                    let mut name = String::from("message");
                    let mut data = None;
                    for line in block.lines() {
                        if let Some(v) = line.strip_prefix("event:") {
                            name = v.trim().to_string();
                        } else if let Some(v) = line.strip_prefix("data:") {
                            data = Some(v.trim().to_string());
                        }
                    }
                    if let Some(data) = data {
                        return Some((name, data));
                    }
                }
                match self.stream.next().await {
                    Some(Ok(chunk)) => self.buffer.push_str(&String::from_utf8_lossy(&chunk)),
                    _ => return None,
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), read)
            .await
            .expect("timed out waiting for an event")
    }
}

/// Collect `count` events, or fewer if the stream ends first.
pub async fn read_events(response: reqwest::Response, count: usize) -> Vec<(String, String)> {
    let mut reader = EventReader::new(response);
    let mut events = Vec::new();
    while events.len() < count {
        match reader.next().await {
            Some(event) => events.push(event),
            None => break,
        }
    }
    events
}
