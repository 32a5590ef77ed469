//! Exponential backoff with jitter, and backend readiness polling.

use std::time::Duration;

use rand::Rng;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const READY_BASE_MS: u64 = 25;
const READY_MAX_MS: u64 = 500;
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(500);

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Jitter of up to 10% of the delay
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Poll `addr` until it accepts a TCP connection.
///
/// Returns `true` once connected, `false` when `limit` elapses or `cancel`
/// fires first.
pub async fn wait_for_tcp(addr: &str, limit: Duration, cancel: &CancellationToken) -> bool {
    let deadline = Instant::now() + limit;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if let Ok(Ok(_)) = tokio::time::timeout(CONNECT_ATTEMPT_TIMEOUT, TcpStream::connect(addr)).await {
            tracing::debug!(address = %addr, attempts = attempt, "Backend accepting connections");
            return true;
        }

        let delay = calculate_backoff(attempt, READY_BASE_MS, READY_MAX_MS);
        if Instant::now() + delay >= deadline {
            return false;
        }

        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
