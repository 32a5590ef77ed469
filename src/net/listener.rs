//! Listener binding and server lifetime.
//!
//! # Responsibilities
//! - Bind a transport's host:port (port 0 picks an ephemeral port)
//! - Serve an axum app with peer addresses available to handlers
//! - Graceful shutdown with a bounded drain

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::transport::TransportError;

/// Bind `host:port`, mapping failures to [`TransportError::Bind`].
pub async fn bind(host: &str, port: u16) -> Result<TcpListener, TransportError> {
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| TransportError::Bind {
            addr: addr.clone(),
            source,
        })?;

    let local_addr = listener
        .local_addr()
        .map_err(|source| TransportError::Bind { addr, source })?;
    tracing::info!(address = %local_addr, "Listener bound");

    Ok(listener)
}

/// A running server task.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Serve `app` on `listener` until [`ServerHandle::shutdown`].
    pub fn spawn(listener: TcpListener, app: Router) -> Result<Self, TransportError> {
        let local_addr = listener.local_addr().map_err(|source| TransportError::Bind {
            addr: "<bound listener>".to_string(),
            source,
        })?;
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone().cancelled_owned();

        let task = tokio::spawn(async move {
            let service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, service)
                .with_graceful_shutdown(signal)
                .await
            {
                tracing::error!(address = %local_addr, error = %e, "Server error");
            }
            tracing::debug!(address = %local_addr, "Server stopped");
        });

        Ok(Self {
            local_addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, wait up to `drain` for in-flight connections, then abort.
    pub async fn shutdown(self, drain: Duration) {
        self.shutdown.cancel();
        let abort = self.task.abort_handle();
        if tokio::time::timeout(drain, self.task).await.is_err() {
            tracing::warn!(
                address = %self.local_addr,
                drain = ?drain,
                "Connections still open after drain, aborting"
            );
            abort.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;

    #[tokio::test]
    async fn port_can_only_be_bound_once() {
        let first = bind("127.0.0.1", 0).await.unwrap();
        let port = first.local_addr().unwrap().port();
        let err = bind("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
    }

    #[tokio::test]
    async fn shutdown_releases_port() {
        let listener = bind("127.0.0.1", 0).await.unwrap();
        let app = Router::new().route("/", get(|| async { "hi" }));
        let server = ServerHandle::spawn(listener, app).unwrap();
        let addr = server.local_addr();

        let body = reqwest::get(format!("http://{addr}/")).await.unwrap().text().await.unwrap();
        assert_eq!(body, "hi");

        server.shutdown(Duration::from_secs(1)).await;
        assert!(bind("127.0.0.1", addr.port()).await.is_ok());
    }
}
