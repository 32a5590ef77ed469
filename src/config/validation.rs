//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (workloads reference declared groups,
//!   middlewares reference known names)
//! - Validate value ranges (timeouts > 0, ports present and unique)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: GatewayConfig → Result<(), Vec<ValidationError>>

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::GatewayConfig;
use crate::middleware::registry::BUILTIN_MIDDLEWARES;
use crate::transport::http::NAMED_ROUTES;
use crate::transport::TransportKind;
use crate::workloads::validate_name;

/// One semantic problem, located by a dotted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let t = &config.timeouts;
    for (field, value) in [
        ("timeouts.deploy_secs", t.deploy_secs),
        ("timeouts.stop_secs", t.stop_secs),
        ("timeouts.backend_ready_secs", t.backend_ready_secs),
        ("timeouts.request_secs", t.request_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must not be empty"));
    }
    if config.rate_limit.requests_per_second == 0 {
        errors.push(ValidationError::new(
            "rate_limit.requests_per_second",
            "must be greater than 0",
        ));
    }
    if let Some(auth) = &config.auth {
        if auth.audience.trim().is_empty() {
            errors.push(ValidationError::new("auth.audience", "must not be empty"));
        }
        if auth.jwks_url.is_none() && auth.jwks_file.is_none() {
            errors.push(ValidationError::new("auth", "one of jwks_url or jwks_file is required"));
        }
        if let Some(jwks_url) = &auth.jwks_url {
            match url::Url::parse(jwks_url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                Ok(parsed) => errors.push(ValidationError::new(
                    "auth.jwks_url",
                    format!("unsupported scheme {}", parsed.scheme()),
                )),
                Err(e) => errors.push(ValidationError::new("auth.jwks_url", format!("invalid URL: {e}"))),
            }
        }
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }
    if config.admin.enabled && config.admin.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new("admin.bind_address", "must be a socket address"));
    }

    let mut groups = HashSet::new();
    for (i, group) in config.groups.iter().enumerate() {
        if let Err(e) = validate_name(group) {
            errors.push(ValidationError::new(format!("groups[{i}]"), e));
        }
        if !groups.insert(group.as_str()) {
            errors.push(ValidationError::new(format!("groups[{i}]"), format!("duplicate group {group}")));
        }
    }

    let mut names = HashSet::new();
    let mut ports = HashSet::new();
    for (i, w) in config.workloads.iter().enumerate() {
        let at = |field: &str| format!("workloads[{i}].{field}");

        if let Err(e) = validate_name(&w.name) {
            errors.push(ValidationError::new(at("name"), e));
        } else if !names.insert(w.name.as_str()) {
            errors.push(ValidationError::new(at("name"), format!("duplicate workload {}", w.name)));
        }

        if w.command.trim().is_empty() {
            errors.push(ValidationError::new(at("command"), "must not be empty"));
        }

        match &w.transport {
            TransportKind::Stdio => {}
            TransportKind::Sse | TransportKind::StreamableHttp => {
                if w.target_port.is_none() {
                    errors.push(ValidationError::new(
                        at("target_port"),
                        format!("required for {} transport", w.transport),
                    ));
                }
            }
            other => {
                errors.push(ValidationError::new(
                    at("transport"),
                    format!("unsupported transport type: {other}"),
                ));
            }
        }

        if w.proxy_port != 0 && !ports.insert((w.host.as_str(), w.proxy_port)) {
            errors.push(ValidationError::new(
                at("proxy_port"),
                format!("{}:{} is already used by another workload", w.host, w.proxy_port),
            ));
        }

        if let Some(group) = &w.group {
            if !groups.contains(group.as_str()) {
                errors.push(ValidationError::new(at("group"), format!("unknown group {group}")));
            }
        }

        for (j, mw) in w.middlewares.iter().enumerate() {
            check_middleware(config, mw, at(&format!("middlewares[{j}]")), &mut errors);
        }
        for (route, mw) in &w.named_middlewares {
            if !NAMED_ROUTES.contains(&route.as_str()) {
                errors.push(ValidationError::new(
                    at("named_middlewares"),
                    format!("unknown route {route}, expected one of {}", NAMED_ROUTES.join(", ")),
                ));
            }
            check_middleware(config, mw, at(&format!("named_middlewares.{route}")), &mut errors);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_middleware(config: &GatewayConfig, name: &str, field: String, errors: &mut Vec<ValidationError>) {
    if !BUILTIN_MIDDLEWARES.contains(&name) {
        errors.push(ValidationError::new(field, format!("unknown middleware {name}")));
    } else if name == "auth" && config.auth.is_none() {
        errors.push(ValidationError::new(field, "auth middleware requires an [auth] section"));
    }
}
