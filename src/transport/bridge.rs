//! Newline-delimited message bridge over a backend's stdin/stdout.
//!
//! # Data Flow
//! ```text
//! HTTP handlers ──send()──▶ mpsc (FIFO) ──▶ writer task ──▶ stdin
//!                                                  one message per write, flushed
//!
//! stdout ──▶ reader task ──┬─▶ pending reply (JSON-RPC response with a waited id)
//!            split on \n   └─▶ broadcast ──▶ every subscribed client stream
//! ```
//!
//! # Design Decisions
//! - Exactly one writer, so client order is stdin order
//! - Exactly one reader, so production order is delivery order
//! - A lagging subscriber loses messages; the reader never waits on clients

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::deployer::StdioPipes;
use crate::observability::metrics;

const OUTBOUND_CAPACITY: usize = 1024;
const BROADCAST_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("backend stdin is closed")]
    Closed,

    #[error("a request with id {0} is already waiting for its response")]
    DuplicateId(String),
}

/// What a JSON-RPC message is, as far as routing replies is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Has `method` and `id`; the key is the JSON text of the id.
    Request(String),
    /// Has `id` but no `method`.
    Response(String),
    Notification,
    /// Batches and anything that is not a JSON object.
    Other,
}

pub fn classify(message: &[u8]) -> MessageKind {
    let Ok(serde_json::Value::Object(object)) = serde_json::from_slice::<serde_json::Value>(message) else {
        return MessageKind::Other;
    };
    let id = object
        .get("id")
        .filter(|id| !id.is_null())
        .map(|id| id.to_string());
    match (object.contains_key("method"), id) {
        (true, Some(id)) => MessageKind::Request(id),
        (true, None) => MessageKind::Notification,
        (false, Some(id)) => MessageKind::Response(id),
        (false, None) => MessageKind::Other,
    }
}

struct Waiter {
    ticket: u64,
    tx: oneshot::Sender<Bytes>,
}

type Pending = Arc<DashMap<String, Waiter>>;

/// A registered wait for the response with a given id.
///
/// Dropping it withdraws the registration.
pub struct PendingReply {
    id: String,
    ticket: u64,
    rx: Option<oneshot::Receiver<Bytes>>,
    pending: Pending,
}

impl PendingReply {
    /// `None` when the bridge shut down before the response arrived.
    pub async fn recv(&mut self) -> Option<Bytes> {
        match self.rx.take() {
            Some(rx) => rx.await.ok(),
            None => None,
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        let ticket = self.ticket;
        self.pending.remove_if(&self.id, |_, waiter| waiter.ticket == ticket);
    }
}

pub struct StdioBridge {
    workload: Arc<str>,
    outbound: mpsc::Sender<Bytes>,
    inbound: broadcast::Sender<Bytes>,
    pending: Pending,
    next_ticket: AtomicU64,
    exited: CancellationToken,
    closed: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StdioBridge {
    /// Take over `pipes` and start the writer and reader tasks.
    pub fn spawn(workload: &str, pipes: StdioPipes) -> Self {
        let workload: Arc<str> = Arc::from(workload);
        let (outbound, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (inbound, _) = broadcast::channel(BROADCAST_CAPACITY);
        let pending: Pending = Arc::new(DashMap::new());
        let exited = CancellationToken::new();
        let closed = CancellationToken::new();

        let writer = tokio::spawn(write_loop(
            Arc::clone(&workload),
            pipes.stdin,
            rx,
            closed.clone(),
        ));
        let reader = tokio::spawn(read_loop(
            Arc::clone(&workload),
            pipes.stdout,
            inbound.clone(),
            Arc::clone(&pending),
            exited.clone(),
            closed.clone(),
        ));

        Self {
            workload,
            outbound,
            inbound,
            pending,
            next_ticket: AtomicU64::new(1),
            exited,
            closed,
            tasks: Mutex::new(vec![writer, reader]),
        }
    }

    /// Queue one message for stdin.
    pub async fn send(&self, message: Bytes) -> Result<(), BridgeError> {
        if self.closed.is_cancelled() {
            return Err(BridgeError::Closed);
        }
        self.outbound.send(message).await.map_err(|_| BridgeError::Closed)
    }

    /// Receive every stdout message not claimed by a pending reply.
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.inbound.subscribe()
    }

    /// Claim the stdout message answering request `id`.
    ///
    /// Register before sending the request so a fast reply is not missed.
    pub fn expect_response(&self, id: &str) -> Result<PendingReply, BridgeError> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        match self.pending.entry(id.to_string()) {
            Entry::Occupied(_) => return Err(BridgeError::DuplicateId(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Waiter { ticket, tx });
            }
        }
        Ok(PendingReply {
            id: id.to_string(),
            ticket,
            rx: Some(rx),
            pending: Arc::clone(&self.pending),
        })
    }

    /// Cancelled once stdout reaches EOF.
    pub fn exited(&self) -> &CancellationToken {
        &self.exited
    }

    pub fn subscriber_count(&self) -> usize {
        self.inbound.receiver_count()
    }

    /// Stop both tasks and fail outstanding replies.
    pub async fn close(&self) {
        self.closed.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().expect("bridge mutex poisoned"));
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(workload = %self.workload, error = %e, "Bridge task ended abnormally");
            }
        }
        self.pending.clear();
        tracing::debug!(workload = %self.workload, "Bridge closed");
    }
}

impl Drop for StdioBridge {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

async fn write_loop(
    workload: Arc<str>,
    mut stdin: Box<dyn AsyncWrite + Send + Unpin>,
    mut rx: mpsc::Receiver<Bytes>,
    closed: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = closed.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        if let Err(e) = write_message(&mut stdin, &message).await {
            tracing::error!(workload = %workload, error = %e, "Failed to write to backend stdin");
            break;
        }
        metrics::record_bridged_message(&workload, "to_backend");
    }
    let _ = stdin.shutdown().await;
}

async fn write_message<W: AsyncWrite + Unpin + ?Sized>(stdin: &mut W, message: &[u8]) -> std::io::Result<()> {
    stdin.write_all(message).await?;
    if !message.ends_with(b"\n") {
        stdin.write_all(b"\n").await?;
    }
    stdin.flush().await
}

async fn read_loop(
    workload: Arc<str>,
    stdout: Box<dyn AsyncRead + Send + Unpin>,
    inbound: broadcast::Sender<Bytes>,
    pending: Pending,
    exited: CancellationToken,
    closed: CancellationToken,
) {
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = tokio::select! {
            _ = closed.cancelled() => break,
            read = reader.read_until(b'\n', &mut line) => read,
        };
        match read {
            Ok(0) => {
                tracing::info!(workload = %workload, "Backend stdout closed");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(workload = %workload, error = %e, "Failed to read backend stdout");
                break;
            }
        }

        let message = trim_line_end(&line);
        if message.is_empty() {
            continue;
        }
        let message = Bytes::copy_from_slice(message);
        metrics::record_bridged_message(&workload, "from_backend");

        if let MessageKind::Response(id) = classify(&message) {
            if let Some((_, waiter)) = pending.remove(&id) {
                let _ = waiter.tx.send(message);
                continue;
            }
        }

        // No subscribers is fine; the message is simply dropped.
        let _ = inbound.send(message);
    }

    exited.cancel();
    pending.clear();
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};
    use std::time::Duration;

    #[test]
    fn classifies_messages() {
        assert_eq!(
            classify(br#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#),
            MessageKind::Request("1".into())
        );
        assert_eq!(
            classify(br#"{"jsonrpc":"2.0","id":"a","result":{}}"#),
            MessageKind::Response("\"a\"".into())
        );
        assert_eq!(
            classify(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#),
            MessageKind::Notification
        );
        assert_eq!(classify(br#"[{"id":1,"method":"x"}]"#), MessageKind::Other);
        assert_eq!(classify(b"not json"), MessageKind::Other);
    }

    #[test]
    fn trims_crlf() {
        assert_eq!(trim_line_end(b"abc\r\n"), b"abc");
        assert_eq!(trim_line_end(b"abc"), b"abc");
        assert_eq!(trim_line_end(b"\n"), b"");
    }

    /// Bridge wired to in-memory pipes; returns the far ends.
    fn wired() -> (StdioBridge, tokio::io::DuplexStream, tokio::io::DuplexStream) {
        let (stdin_near, stdin_far) = duplex(64 * 1024);
        let (stdout_far, stdout_near) = duplex(64 * 1024);
        let bridge = StdioBridge::spawn(
            "test",
            StdioPipes {
                stdin: Box::new(stdin_near),
                stdout: Box::new(stdout_near),
            },
        );
        (bridge, stdin_far, stdout_far)
    }

    #[tokio::test]
    async fn writes_in_order_with_newlines() {
        let (bridge, mut stdin_far, _stdout_far) = wired();
        for i in 0..50 {
            bridge.send(Bytes::from(format!("msg-{i}"))).await.unwrap();
        }
        bridge.send(Bytes::from_static(b"already\n")).await.unwrap();

        let mut expected = String::new();
        for i in 0..50 {
            expected.push_str(&format!("msg-{i}\n"));
        }
        expected.push_str("already\n");

        let mut buf = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(5), stdin_far.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), expected);
    }

    #[tokio::test]
    async fn broadcasts_in_production_order() {
        let (bridge, _stdin_far, mut stdout_far) = wired();
        let mut first = bridge.subscribe();
        let mut second = bridge.subscribe();

        for i in 0..20 {
            stdout_far.write_all(format!("line-{i}\r\n").as_bytes()).await.unwrap();
        }
        stdout_far.flush().await.unwrap();

        for rx in [&mut first, &mut second] {
            for i in 0..20 {
                let message = rx.recv().await.unwrap();
                assert_eq!(message, Bytes::from(format!("line-{i}")));
            }
        }
    }

    #[tokio::test]
    async fn routes_response_to_waiter() {
        let (bridge, _stdin_far, mut stdout_far) = wired();
        let mut everyone = bridge.subscribe();
        let mut reply = bridge.expect_response("7").unwrap();
        assert!(matches!(bridge.expect_response("7"), Err(BridgeError::DuplicateId(_))));

        stdout_far
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n{\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{}}\n")
            .await
            .unwrap();

        let answer = reply.recv().await.unwrap();
        assert_eq!(classify(&answer), MessageKind::Response("7".into()));

        let broadcast = everyone.recv().await.unwrap();
        assert_eq!(classify(&broadcast), MessageKind::Notification);
    }

    #[tokio::test]
    async fn dropped_reply_withdraws_registration() {
        let (bridge, _stdin_far, _stdout_far) = wired();
        let reply = bridge.expect_response("1").unwrap();
        drop(reply);
        assert!(bridge.expect_response("1").is_ok());
    }

    #[tokio::test]
    async fn eof_marks_exited() {
        let (bridge, _stdin_far, stdout_far) = wired();
        drop(stdout_far);
        tokio::time::timeout(Duration::from_secs(5), bridge.exited().cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (bridge, _stdin_far, _stdout_far) = wired();
        bridge.close().await;
        assert!(matches!(bridge.send(Bytes::from_static(b"x")).await, Err(BridgeError::Closed)));
    }
}
