//! Shutdown coordination for the gateway.

use tokio_util::sync::CancellationToken;

/// Root cancellation for the daemon.
///
/// Every long-running task receives a child token, so triggering here
/// unblocks all of them at once.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that fires when shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Shutdown triggered");
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_reaches_child_tokens() {
        let shutdown = Shutdown::new();
        let child = shutdown.token();
        assert!(!child.is_cancelled());

        shutdown.trigger();
        shutdown.trigger();
        child.cancelled().await;
        assert!(shutdown.is_triggered());
    }
}
