//! Bearer token validation.
//!
//! # Flow
//! ```text
//! Authorization: Bearer <jwt>
//!     → decode header (kid, alg)
//!     → key lookup in the JWKS (refetched on an unknown kid, at most
//!       once per refresh interval)
//!     → signature + exp/nbf (+ issuer) via jsonwebtoken
//!     → audience membership, scope membership
//!     → Claims in request extensions
//! ```
//!
//! Failures answer 401 `{"error": "Token validation failed", "details": ...}`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::AuthConfig;
use crate::middleware::{from_fn, rejection, Middleware};
use crate::observability::metrics;

/// Validated token claims, stored in request extensions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub aud: Vec<String>,
    /// Space-delimited scopes.
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub exp: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Claims {
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.split_whitespace()
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(aud) => vec![aud],
        OneOrMany::Many(auds) => auds,
    })
}

/// Subject of an authenticated request, left on the response for the audit stage.
#[derive(Debug, Clone)]
pub struct AuthenticatedSubject(pub String);

/// OAuth protected resource metadata served at
/// `/.well-known/oauth-protected-resource`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    pub resource: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorization_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
    #[serde(default = "default_bearer_methods")]
    pub bearer_methods_supported: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_documentation: Option<String>,
}

fn default_bearer_methods() -> Vec<String> {
    vec!["header".to_string()]
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing or invalid Authorization header")]
    MissingToken,

    #[error("malformed token: {0}")]
    Malformed(#[source] jsonwebtoken::errors::Error),

    #[error("key not found in JWKS: {0}")]
    UnknownKey(String),

    #[error("algorithm {0:?} not allowed for this key")]
    Algorithm(Algorithm),

    #[error("token parsing failed: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),

    #[error("invalid audience: expected {expected}, got {got:?}")]
    Audience { expected: String, got: Vec<String> },

    #[error("missing required scope: {0}")]
    Scope(String),

    #[error("failed to load JWKS: {0}")]
    Jwks(String),
}

impl AuthError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::Malformed(_) => "malformed",
            AuthError::UnknownKey(_) => "unknown_key",
            AuthError::Algorithm(_) => "algorithm",
            AuthError::Invalid(_) => "invalid",
            AuthError::Audience { .. } => "audience",
            AuthError::Scope(_) => "scope",
            AuthError::Jwks(_) => "jwks",
        }
    }
}

#[derive(Clone)]
struct KeyEntry {
    key: DecodingKey,
    algorithms: Vec<Algorithm>,
}

/// Verification keys by `kid`.
#[derive(Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, KeyEntry>,
}

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kid: impl Into<String>, key: DecodingKey, algorithms: Vec<Algorithm>) {
        self.keys.insert(kid.into(), KeyEntry { key, algorithms });
    }

    pub fn from_jwks(jwks: &JwkSet) -> Result<Self, AuthError> {
        let mut set = KeySet::new();
        for jwk in &jwks.keys {
            let kid = jwk.common.key_id.clone().unwrap_or_default();
            let key = DecodingKey::from_jwk(jwk).map_err(|e| AuthError::Jwks(e.to_string()))?;
            set.insert(kid, key, algorithm_family(&jwk.algorithm));
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Look up by kid; a token without a kid matches a single-key set.
    fn find(&self, kid: Option<&str>) -> Option<KeyEntry> {
        match kid {
            Some(kid) => self.keys.get(kid).cloned(),
            None if self.keys.len() == 1 => self.keys.values().next().cloned(),
            None => None,
        }
    }
}

fn algorithm_family(params: &AlgorithmParameters) -> Vec<Algorithm> {
    match params {
        AlgorithmParameters::RSA(_) => vec![
            Algorithm::RS256,
            Algorithm::RS384,
            Algorithm::RS512,
            Algorithm::PS256,
            Algorithm::PS384,
            Algorithm::PS512,
        ],
        AlgorithmParameters::EllipticCurve(_) => vec![Algorithm::ES256, Algorithm::ES384],
        AlgorithmParameters::OctetKey(_) => vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512],
        AlgorithmParameters::OctetKeyPair(_) => vec![Algorithm::EdDSA],
    }
}

const JWKS_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

fn jwks_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// Validates bearer tokens for one audience.
pub struct TokenValidator {
    keys: ArcSwap<KeySet>,
    audience: String,
    scopes: Vec<String>,
    issuer: Option<String>,
    jwks_url: Option<String>,
    client: reqwest::Client,
    /// When the JWKS was last fetched, successfully or not.
    refreshed: tokio::sync::Mutex<Option<Instant>>,
    min_refresh: Duration,
}

impl TokenValidator {
    pub fn new(keys: KeySet, audience: impl Into<String>, scopes: Vec<String>) -> Self {
        Self {
            keys: ArcSwap::from_pointee(keys),
            audience: audience.into(),
            scopes,
            issuer: None,
            jwks_url: None,
            client: jwks_client(JWKS_TIMEOUT),
            refreshed: tokio::sync::Mutex::new(None),
            min_refresh: MIN_REFRESH_INTERVAL,
        }
    }

    /// Refetch keys from `url` when a token names an unknown `kid`.
    pub fn with_jwks_url(mut self, url: impl Into<String>) -> Self {
        self.jwks_url = Some(url.into());
        self
    }

    /// Bound each JWKS fetch by `timeout` and refetch at most once per `min_interval`.
    pub fn with_refresh_policy(mut self, timeout: Duration, min_interval: Duration) -> Self {
        self.client = jwks_client(timeout);
        self.min_refresh = min_interval;
        self
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Build from configuration, loading keys from a JWKS URL or file.
    pub async fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        let keys = match (&config.jwks_url, &config.jwks_file) {
            (Some(url), _) => fetch_jwks(&jwks_client(JWKS_TIMEOUT), url).await?,
            (None, Some(path)) => read_jwks(path)?,
            (None, None) => return Err(AuthError::Jwks("no jwks_url or jwks_file configured".into())),
        };
        tracing::info!(
            keys = keys.len(),
            audience = %config.audience,
            "Token validator ready"
        );

        let mut validator = TokenValidator::new(keys, config.audience.clone(), config.scopes.clone());
        validator.issuer = config.issuer.clone();
        validator.jwks_url = config.jwks_url.clone();
        Ok(validator)
    }

    pub async fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        let header = jsonwebtoken::decode_header(token).map_err(AuthError::Malformed)?;
        let kid = header.kid.as_deref();

        let entry = match self.keys.load().find(kid) {
            Some(entry) => entry,
            None => {
                self.refresh_keys().await?;
                self.keys
                    .load()
                    .find(kid)
                    .ok_or_else(|| AuthError::UnknownKey(kid.unwrap_or("<none>").to_string()))?
            }
        };
        if !entry.algorithms.contains(&header.alg) {
            return Err(AuthError::Algorithm(header.alg));
        }

        let mut validation = Validation::new(header.alg);
        validation.validate_aud = false;
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }

        let claims = jsonwebtoken::decode::<Claims>(token, &entry.key, &validation)
            .map_err(AuthError::Invalid)?
            .claims;

        if !claims.aud.iter().any(|aud| aud == &self.audience) {
            return Err(AuthError::Audience {
                expected: self.audience.clone(),
                got: claims.aud.clone(),
            });
        }
        if let Some(missing) = self.scopes.iter().find(|s| !claims.scopes().any(|c| c == s.as_str())) {
            return Err(AuthError::Scope(missing.clone()));
        }

        Ok(claims)
    }

    async fn refresh_keys(&self) -> Result<(), AuthError> {
        let Some(url) = &self.jwks_url else {
            return Ok(());
        };
        let mut refreshed = self.refreshed.lock().await;
        if refreshed.is_some_and(|at| at.elapsed() < self.min_refresh) {
            tracing::debug!(url = %url, "JWKS refreshed recently, keeping current keys");
            return Ok(());
        }
        *refreshed = Some(Instant::now());
        let keys = fetch_jwks(&self.client, url).await?;
        tracing::debug!(keys = keys.len(), url = %url, "JWKS refreshed");
        self.keys.store(Arc::new(keys));
        Ok(())
    }
}

async fn fetch_jwks(client: &reqwest::Client, url: &str) -> Result<KeySet, AuthError> {
    let jwks: JwkSet = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| AuthError::Jwks(e.to_string()))?
        .json()
        .await
        .map_err(|e| AuthError::Jwks(e.to_string()))?;
    KeySet::from_jwks(&jwks)
}

fn read_jwks(path: &Path) -> Result<KeySet, AuthError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AuthError::Jwks(format!("{}: {e}", path.display())))?;
    let jwks: JwkSet = serde_json::from_str(&raw).map_err(|e| AuthError::Jwks(e.to_string()))?;
    KeySet::from_jwks(&jwks)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub fn middleware(validator: Arc<TokenValidator>) -> Arc<dyn Middleware> {
    from_fn("auth", move |mut req: Request, next: Next| {
        let validator = Arc::clone(&validator);
        async move {
            let token = bearer_token(req.headers()).map(str::to_owned);
            let result = match token {
                Some(token) => validator.validate(&token).await,
                None => Err(AuthError::MissingToken),
            };

            match result {
                Ok(claims) => {
                    let subject = claims.sub.clone();
                    req.extensions_mut().insert(claims);
                    let mut response = next.run(req).await;
                    if let Some(subject) = subject {
                        response.extensions_mut().insert(AuthenticatedSubject(subject));
                    }
                    response
                }
                Err(e) => {
                    metrics::record_auth_rejection(e.kind());
                    let mut response = rejection(
                        "auth",
                        StatusCode::UNAUTHORIZED,
                        "Token validation failed",
                        e.to_string(),
                    );
                    response
                        .headers_mut()
                        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                    response
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{handler, MiddlewareChain};
    use axum::body::Body;
    use axum::response::IntoResponse;
    use jsonwebtoken::{EncodingKey, Header};
    use std::convert::Infallible;
    use tower::ServiceExt;

    const SECRET: &[u8] = b"test-signing-secret";

    fn validator() -> Arc<TokenValidator> {
        let mut keys = KeySet::new();
        keys.insert("k1", DecodingKey::from_secret(SECRET), vec![Algorithm::HS256]);
        Arc::new(TokenValidator::new(keys, "backend", vec!["backend-access".into()]))
    }

    fn token(aud: serde_json::Value, scope: &str) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("k1".into());
        let claims = serde_json::json!({
            "sub": "alice",
            "aud": aud,
            "scope": scope,
            "exp": chrono::Utc::now().timestamp() + 3600,
        });
        jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    fn protected() -> crate::middleware::Handler {
        MiddlewareChain::new(vec![middleware(validator())]).apply(handler(tower::service_fn(
            |req: Request| async move {
                let sub = req.extensions().get::<Claims>().and_then(|c| c.sub.clone()).unwrap_or_default();
                Ok::<_, Infallible>(sub.into_response())
            },
        )))
    }

    fn request(token: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/mcp");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn accepts_valid_token_and_exposes_claims() {
        let jwt = token(serde_json::json!(["backend", "other"]), "read backend-access");
        let response = protected().oneshot(request(Some(&jwt))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"alice");
    }

    #[tokio::test]
    async fn rejects_wrong_audience() {
        let jwt = token(serde_json::json!("other"), "backend-access");
        let response = protected().oneshot(request(Some(&jwt))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");

        let json = body_json(response).await;
        assert_eq!(json["error"], "Token validation failed");
        assert!(json["details"].as_str().unwrap().contains("invalid audience"));
    }

    #[tokio::test]
    async fn rejects_missing_scope() {
        let jwt = token(serde_json::json!("backend"), "read write");
        let response = protected().oneshot(request(Some(&jwt))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert!(json["details"].as_str().unwrap().contains("missing required scope"));
    }

    #[tokio::test]
    async fn rejects_missing_header() {
        let response = protected().oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rejects_bad_signature() {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("k1".into());
        let claims = serde_json::json!({
            "aud": "backend",
            "scope": "backend-access",
            "exp": chrono::Utc::now().timestamp() + 3600,
        });
        let forged = jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(b"wrong")).unwrap();
        let err = validator().validate(&forged).await.unwrap_err();
        assert!(matches!(err, AuthError::Invalid(_)));
    }

    async fn jwks_server(hang: bool) -> (String, Arc<std::sync::atomic::AtomicUsize>) {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = axum::Router::new().route(
            "/jwks",
            axum::routing::get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if hang {
                        std::future::pending::<()>().await;
                    }
                    axum::Json(serde_json::json!({ "keys": [] }))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}/jwks"), hits)
    }

    fn stranger_token() -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("rotated".into());
        let claims = serde_json::json!({ "aud": "backend", "exp": chrono::Utc::now().timestamp() + 3600 });
        jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    #[tokio::test]
    async fn unknown_kid_refetches_at_most_once_per_interval() {
        use std::sync::atomic::Ordering;

        let (url, hits) = jwks_server(false).await;
        let validator = TokenValidator::new(KeySet::new(), "backend", vec![])
            .with_jwks_url(url)
            .with_refresh_policy(Duration::from_secs(2), Duration::from_secs(60));

        for _ in 0..5 {
            let err = validator.validate(&stranger_token()).await.unwrap_err();
            assert!(matches!(err, AuthError::UnknownKey(_)));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hanging_jwks_server_times_out() {
        let (url, _) = jwks_server(true).await;
        let validator = TokenValidator::new(KeySet::new(), "backend", vec![])
            .with_jwks_url(url)
            .with_refresh_policy(Duration::from_millis(200), Duration::ZERO);

        let started = Instant::now();
        let err = validator.validate(&stranger_token()).await.unwrap_err();
        assert!(matches!(err, AuthError::Jwks(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn keyset_from_oct_jwks() {
        let jwks: JwkSet = serde_json::from_value(serde_json::json!({
            "keys": [{ "kty": "oct", "kid": "shared", "k": "c2VjcmV0", "alg": "HS256" }]
        }))
        .unwrap();
        let keys = KeySet::from_jwks(&jwks).unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.find(Some("shared")).is_some());
        assert!(keys.find(None).is_some());
    }
}
