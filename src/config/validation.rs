//! Configuration validation.
//!
//! Serde handles syntax; this checks value ranges and addresses. All errors
//! are collected rather than stopping at the first.

use std::net::SocketAddr;

use crate::config::schema::EngineConfig;

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("timeouts.request_ms must be greater than zero")]
    ZeroDeadline,
    #[error("{field} is not a valid socket address: {value}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("listener.max_connections must be greater than zero")]
    ZeroConnections,
    #[error("logging.level `{0}` is not a known level")]
    UnknownLogLevel(String),
    #[error("admin.api_key must not be empty when the admin API is enabled")]
    EmptyAdminKey,
}

/// Check `config` for semantic errors.
pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.timeouts.request_ms == 0 {
        errors.push(ValidationError::ZeroDeadline);
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroConnections);
    }

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::EmptyAdminKey);
        }
    }

    // Bare levels are checked; full filter directives are left to EnvFilter.
    let level = config.logging.level.trim().to_ascii_lowercase();
    if !level.contains('=') && !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::UnknownLogLevel(config.logging.level.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
