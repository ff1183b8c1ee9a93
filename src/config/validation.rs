//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, windows > 0)
//! - Check that addresses, header names and media types parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: MuxConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use axum::http::{HeaderName, HeaderValue};
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::MuxConfig;
use crate::http::headers::parse_media_type;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: `{value}` is not a socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("request.default_content_type: `{0}` is not a media type")]
    InvalidMediaType(String),

    #[error("{field}: `{value}` is not a valid header name")]
    InvalidHeaderName { field: &'static str, value: String },

    #[error("response.default_headers: invalid value for `{0}`")]
    InvalidHeaderValue(String),
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &MuxConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.max_concurrent_requests == 0 {
        errors.push(ValidationError::Zero {
            field: "listener.max_concurrent_requests",
        });
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "timeouts.request_secs",
        });
    }

    if parse_media_type(&config.request.default_content_type).is_err() {
        errors.push(ValidationError::InvalidMediaType(
            config.request.default_content_type.clone(),
        ));
    }

    let rate_limit = &config.rate_limit;
    if rate_limit.enabled {
        if rate_limit.capacity == 0 {
            errors.push(ValidationError::Zero {
                field: "rate_limit.capacity",
            });
        }
        if rate_limit.window_ms == 0 {
            errors.push(ValidationError::Zero {
                field: "rate_limit.window_ms",
            });
        }
    }
    if let Some(name) = &rate_limit.key_header {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            errors.push(ValidationError::InvalidHeaderName {
                field: "rate_limit.key_header",
                value: name.clone(),
            });
        }
    }

    for header in &config.response.default_headers {
        if HeaderName::from_bytes(header.name.as_bytes()).is_err() {
            errors.push(ValidationError::InvalidHeaderName {
                field: "response.default_headers",
                value: header.name.clone(),
            });
        } else if HeaderValue::from_str(&header.value).is_err() {
            errors.push(ValidationError::InvalidHeaderValue(header.name.clone()));
        }
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
