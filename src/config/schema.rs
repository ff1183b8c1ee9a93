//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! multiplexer. All types derive Serde traits for deserialization from
//! config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the multiplexer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MuxConfig {
    /// Listener configuration (bind address, backpressure).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request validation defaults.
    pub request: RequestConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Response writing defaults.
    pub response: ResponseConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum requests in flight (backpressure).
    pub max_concurrent_requests: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_concurrent_requests: 10_000,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response head) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Defaults applied by the request validator.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Expected `type/subtype` for endpoints without an override.
    pub default_content_type: String,

    /// Body ceiling in bytes for endpoints without an override.
    /// Zero forbids request bodies.
    pub max_body_size: usize,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            default_content_type: "application/json".to_string(),
            max_body_size: 1024 * 1024,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting on endpoints that opt in.
    pub enabled: bool,

    /// Requests admitted per key within one window.
    pub capacity: usize,

    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Header carrying the rate-limit key. Falls back to the remote IP
    /// when unset or absent from a request.
    pub key_header: Option<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: 100,
            window_ms: 1_000,
            key_header: None,
        }
    }
}

/// A header added to every response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DefaultHeader {
    pub name: String,
    pub value: String,
}

impl DefaultHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Response writing defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResponseConfig {
    /// Headers merged into every response.
    pub default_headers: Vec<DefaultHeader>,

    /// Keep a copy of response bodies for debug logging.
    pub capture_body: bool,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            default_headers: vec![DefaultHeader::new("x-content-type-options", "nosniff")],
            capture_body: false,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter
    /// directive. `RUST_LOG` takes precedence.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: MuxConfig = toml::from_str(
            r#"
            [rate_limit]
            enabled = true
            capacity = 5

            [observability]
            log_format = "json"

            [[response.default_headers]]
            name = "x-frame-options"
            value = "DENY"
            "#,
        )
        .unwrap();

        assert!(config.rate_limit.enabled);
        assert_eq!(config.rate_limit.capacity, 5);
        assert_eq!(config.rate_limit.window_ms, 1_000);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.request.default_content_type, "application/json");
        assert_eq!(
            config.response.default_headers,
            vec![DefaultHeader::new("x-frame-options", "DENY")]
        );
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
    }
}
