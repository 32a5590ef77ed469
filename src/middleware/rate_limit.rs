//! Token-bucket rate limiting per client.
//!
//! Clients are keyed by the authenticated subject when an auth stage ran
//! earlier in the chain, otherwise by peer IP.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request};
use axum::http::StatusCode;
use axum::middleware::Next;

use crate::middleware::auth::Claims;
use crate::middleware::{from_fn, rejection, Middleware};
use crate::observability::metrics;

/// A simple token bucket.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    /// Whether the bucket has refilled to `capacity` by `now`. A full bucket
    /// behaves exactly like a fresh one.
    fn is_full(&self, now: Instant, capacity: f64, refill_rate: f64) -> bool {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens + elapsed * refill_rate >= capacity
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

struct Buckets {
    clients: HashMap<String, TokenBucket>,
    last_prune: Instant,
}

/// Buckets for one workload. Idle clients whose bucket refilled are dropped
/// once per prune interval.
pub struct RateLimiter {
    buckets: Mutex<Buckets>,
    rps: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(rps: u32, burst: u32) -> Self {
        Self {
            buckets: Mutex::new(Buckets {
                clients: HashMap::new(),
                last_prune: Instant::now(),
            }),
            rps: rps as f64,
            burst: burst.max(1) as f64,
        }
    }

    pub fn check(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        let now = Instant::now();
        if now.duration_since(buckets.last_prune) >= PRUNE_INTERVAL {
            self.prune_locked(&mut buckets, now);
        }
        let bucket = buckets
            .clients
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.burst));
        bucket.try_acquire(self.burst, self.rps)
    }

    /// Drop every client whose bucket is full again.
    pub fn prune(&self) {
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        self.prune_locked(&mut buckets, Instant::now());
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.lock().expect("rate limiter mutex poisoned").clients.len()
    }

    fn prune_locked(&self, buckets: &mut Buckets, now: Instant) {
        let before = buckets.clients.len();
        buckets
            .clients
            .retain(|_, bucket| !bucket.is_full(now, self.burst, self.rps));
        buckets.last_prune = now;
        if buckets.clients.len() < before {
            tracing::debug!(
                evicted = before - buckets.clients.len(),
                remaining = buckets.clients.len(),
                "Pruned idle rate limit buckets"
            );
        }
    }
}

pub fn middleware(workload: &str, limiter: Arc<RateLimiter>) -> Arc<dyn Middleware> {
    let workload: Arc<str> = Arc::from(workload);
    from_fn("rate-limit", move |req: Request, next: Next| {
        let limiter = Arc::clone(&limiter);
        let workload = Arc::clone(&workload);
        async move {
            let key = client_key(&req);
            if limiter.check(&key) {
                return next.run(req).await;
            }

            metrics::record_rate_limited(&workload);
            rejection(
                "rate-limit",
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded",
                format!("client {key} exceeded {} requests/s", limiter.rps),
            )
        }
    })
}

fn client_key(req: &Request) -> String {
    if let Some(subject) = req.extensions().get::<Claims>().and_then(|c| c.sub.clone()) {
        return format!("sub:{subject}");
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| format!("ip:{}", addr.ip()))
        .unwrap_or_else(|| "unknown".to_string())
}
