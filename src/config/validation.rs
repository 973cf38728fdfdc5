//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check histogram buckets are usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServiceConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),

    #[error("observability.log_level: unknown level '{0}'")]
    UnknownLogLevel(String),

    #[error("observability.latency_buckets must not be empty")]
    EmptyBuckets,

    #[error("observability.latency_buckets must be strictly increasing and positive")]
    UnorderedBuckets,

    #[error("observability.otlp_endpoint: expected an http(s) URL, got '{0}'")]
    InvalidEndpoint(String),
}

/// Validate a parsed configuration, collecting every error found.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let obs = &config.observability;

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: obs.metrics_address.clone(),
        });
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::NotPositive("timeouts.request_secs"));
    }
    if obs.export_interval_secs == 0 {
        errors.push(ValidationError::NotPositive("observability.export_interval_secs"));
    }
    if obs.span_queue_capacity == 0 {
        errors.push(ValidationError::NotPositive("observability.span_queue_capacity"));
    }

    if !LOG_LEVELS.contains(&obs.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::UnknownLogLevel(obs.log_level.clone()));
    }

    if obs.latency_buckets.is_empty() {
        errors.push(ValidationError::EmptyBuckets);
    } else {
        let ordered = obs.latency_buckets.windows(2).all(|w| w[0] < w[1]);
        if !ordered || obs.latency_buckets[0] <= 0.0 {
            errors.push(ValidationError::UnorderedBuckets);
        }
    }

    if let Some(endpoint) = &obs.otlp_endpoint {
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            errors.push(ValidationError::InvalidEndpoint(endpoint.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
