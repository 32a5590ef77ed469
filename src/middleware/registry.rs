//! Built-in middlewares selectable by name from configuration.

use std::sync::Arc;

use crate::config::{GatewayConfig, RateLimitConfig};
use crate::middleware::auth::{AuthError, TokenValidator};
use crate::middleware::rate_limit::RateLimiter;
use crate::middleware::{audit, auth, rate_limit, request_id, telemetry, Middleware};

pub const BUILTIN_MIDDLEWARES: &[&str] = &["request-id", "audit", "telemetry", "rate-limit", "auth"];

#[derive(Debug, thiserror::Error)]
#[error("unknown middleware {0}")]
pub struct UnknownMiddleware(pub String);

/// Shared state behind the built-ins; resolves names per workload.
#[derive(Clone, Default)]
pub struct MiddlewareRegistry {
    validator: Option<Arc<TokenValidator>>,
    rate_limit: RateLimitConfig,
}

impl MiddlewareRegistry {
    pub fn new(validator: Option<Arc<TokenValidator>>, rate_limit: RateLimitConfig) -> Self {
        Self {
            validator,
            rate_limit,
        }
    }

    /// Build from configuration, fetching the JWKS when auth is configured.
    pub async fn from_config(config: &GatewayConfig) -> Result<Self, AuthError> {
        let validator = match &config.auth {
            Some(auth) => Some(Arc::new(TokenValidator::from_config(auth).await?)),
            None => None,
        };
        Ok(Self::new(validator, config.rate_limit.clone()))
    }

    /// Instantiate `name` for `workload`. Rate-limit buckets are per workload.
    pub fn resolve(&self, name: &str, workload: &str) -> Result<Arc<dyn Middleware>, UnknownMiddleware> {
        match name {
            "request-id" => Ok(request_id::middleware()),
            "audit" => Ok(audit::middleware(workload)),
            "telemetry" => Ok(telemetry::middleware(workload)),
            "rate-limit" => {
                let limiter = RateLimiter::new(
                    self.rate_limit.requests_per_second,
                    self.rate_limit.burst_size,
                );
                Ok(rate_limit::middleware(workload, Arc::new(limiter)))
            }
            "auth" => self
                .validator
                .as_ref()
                .map(|v| auth::middleware(Arc::clone(v)))
                .ok_or_else(|| UnknownMiddleware("auth (no [auth] section configured)".to_string())),
            other => Err(UnknownMiddleware(other.to_string())),
        }
    }

    pub fn resolve_all(
        &self,
        names: &[String],
        workload: &str,
    ) -> Result<Vec<Arc<dyn Middleware>>, UnknownMiddleware> {
        names.iter().map(|n| self.resolve(n, workload)).collect()
    }
}
