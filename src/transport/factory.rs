//! Builds the transport variant a config asks for.

use std::sync::Arc;

use crate::transport::http::{HttpMode, HttpTransport};
use crate::transport::stdio::StdioTransport;
use crate::transport::{Transport, TransportConfig, TransportError, TransportKind};

/// Stateless constructor for transports.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportFactory;

impl TransportFactory {
    pub fn new() -> Self {
        Self
    }

    /// Build (but do not start) the transport for `config.kind`.
    pub fn create(&self, config: TransportConfig) -> Result<Arc<dyn Transport>, TransportError> {
        let named = config.named_middlewares.clone();

        let transport: Arc<dyn Transport> = match &config.kind {
            TransportKind::Stdio => {
                let mode = config.proxy_mode;
                let stdio = StdioTransport::new(config);
                stdio.set_proxy_mode(mode);
                Arc::new(stdio)
            }
            TransportKind::Sse => Arc::new(HttpTransport::new(HttpMode::Sse, config)),
            TransportKind::StreamableHttp => Arc::new(HttpTransport::new(HttpMode::StreamableHttp, config)),
            kind @ (TransportKind::Inspector | TransportKind::Unknown(_)) => {
                return Err(TransportError::Unsupported(kind.clone()));
            }
        };

        if !named.is_empty() {
            match transport.named_middlewares() {
                Some(support) => support.set_named_middlewares(named),
                None => tracing::debug!(
                    kind = %transport.kind(),
                    "Transport has no named routes, ignoring named middlewares"
                ),
            }
        }

        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployer::ProcessDeployer;
    use crate::middleware::from_fn;
    use crate::transport::{ProxyMode, TransportState};
    use axum::extract::Request;
    use axum::middleware::Next;
    use std::collections::HashMap;

    fn config(kind: &str) -> TransportConfig {
        TransportConfig::new(kind, Arc::new(ProcessDeployer::new()))
    }

    fn passthrough() -> Arc<dyn crate::middleware::Middleware> {
        from_fn("passthrough", |req: Request, next: Next| async move { next.run(req).await })
    }

    #[test]
    fn builds_supported_kinds() {
        let factory = TransportFactory::new();
        for kind in ["stdio", "sse", "streamable-http"] {
            let transport = factory.create(config(kind)).unwrap();
            assert_eq!(transport.kind().as_str(), kind);
            assert_eq!(transport.state(), TransportState::Created);
            assert!(transport.local_addr().is_none());
        }
    }

    #[test]
    fn rejects_inspector_and_unknown() {
        let factory = TransportFactory::new();
        for kind in ["inspector", "websocket", ""] {
            let err = factory.create(config(kind)).err().unwrap();
            assert!(matches!(err, TransportError::Unsupported(_)));
            assert!(err.to_string().contains("unsupported transport type"));
        }
    }

    #[test]
    fn installs_named_middlewares_when_supported() {
        let mut cfg = config("streamable-http");
        cfg.named_middlewares = HashMap::from([("health".to_string(), passthrough())]);
        let transport = TransportFactory::new().create(cfg).unwrap();

        let support = transport.named_middlewares().unwrap();
        assert_eq!(support.named_middleware("health").unwrap().name(), "passthrough");
        assert!(support.named_middleware("proxy").is_none());
    }

    #[test]
    fn ignores_named_middlewares_without_capability() {
        let mut cfg = config("stdio");
        cfg.proxy_mode = ProxyMode::StreamableHttp;
        cfg.named_middlewares = HashMap::from([("health".to_string(), passthrough())]);
        let transport = TransportFactory::new().create(cfg).unwrap();
        assert!(transport.named_middlewares().is_none());
        assert_eq!(transport.kind(), TransportKind::Stdio);
    }
}
