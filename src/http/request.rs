//! Request validation and the handler-facing request.
//!
//! # Responsibilities
//! - Enforce Content-Length / Content-Type / body-size policy before a
//!   handler runs
//! - Read the body to completion through a length-limited reader
//! - Hand handlers a `Request` with the validated body and request ID
//!
//! # Design Decisions
//! - Checks run in a fixed order so the first failing rule decides the status
//! - A declared length over the ceiling is refused without reading
//! - Validation never writes; every failure is a `ResponseError`

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde::de::DeserializeOwned;
use std::net::SocketAddr;

use crate::http::headers::parse_media_type;
use crate::http::problem::{ProblemDetail, ResponseError};
use crate::http::sink::BoxError;

/// Body rules for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyPolicy {
    /// Required `type/subtype` of the request body.
    pub expected_content_type: String,
    /// Largest accepted body in bytes; `0` forbids a body.
    pub max_body_size: usize,
}

/// Methods whose requests must carry a body.
pub fn body_required(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Whether the request announces a body.
fn carries_body(headers: &HeaderMap) -> bool {
    if headers.contains_key(header::TRANSFER_ENCODING) {
        return true;
    }
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .is_some_and(|len| len > 0)
}

fn bad_request(detail: impl Into<String>, cause: impl Into<BoxError>) -> ResponseError {
    ResponseError::client(
        ProblemDetail::new(StatusCode::BAD_REQUEST).with_detail(detail),
        cause,
    )
}

fn unsupported_media_type(detail: String, expected: &str) -> ResponseError {
    let error = ResponseError::client(
        ProblemDetail::new(StatusCode::UNSUPPORTED_MEDIA_TYPE).with_detail(detail.clone()),
        detail,
    );
    match HeaderValue::from_str(expected) {
        Ok(value) => error.with_header(header::ACCEPT, value),
        Err(_) => error,
    }
}

fn payload_too_large(detail: &str, limit: usize) -> ResponseError {
    let detail = format!("{detail}. Limit: {limit} bytes");
    ResponseError::client(
        ProblemDetail::new(StatusCode::PAYLOAD_TOO_LARGE).with_detail(detail.clone()),
        detail,
    )
}

/// Validate the request headers against `policy` and read the body.
///
/// Requests that neither carry a body nor use a method that requires one
/// pass through with an empty body.
pub async fn read_validated_body(
    method: &Method,
    headers: &HeaderMap,
    body: Body,
    policy: &BodyPolicy,
) -> Result<Bytes, ResponseError> {
    let required = body_required(method);
    if !required && !carries_body(headers) {
        return Ok(Bytes::new());
    }

    let declared = match headers.get(header::CONTENT_LENGTH) {
        None if required => {
            return Err(ResponseError::client(
                ProblemDetail::new(StatusCode::LENGTH_REQUIRED)
                    .with_detail(format!("{method} requests must declare a Content-Length")),
                "missing Content-Length",
            ));
        }
        None => None,
        Some(value) => {
            let length = value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .ok_or_else(|| {
                    bad_request(
                        "Content-Length must be a non-negative integer",
                        "malformed Content-Length",
                    )
                })?;
            if length == 0 && required {
                return Err(bad_request(
                    format!("{method} requests must carry a non-empty body"),
                    "empty body",
                ));
            }
            Some(length)
        }
    };

    let expected = policy.expected_content_type.to_ascii_lowercase();
    let content_type = headers.get(header::CONTENT_TYPE).ok_or_else(|| {
        unsupported_media_type(
            format!("Content-Type is required; expected {expected}"),
            &expected,
        )
    })?;
    let content_type = content_type
        .to_str()
        .map_err(|e| bad_request("Content-Type contains invalid characters", e))?;
    let media_type = parse_media_type(content_type)
        .map_err(|e| bad_request(format!("malformed Content-Type: {e}"), e))?;
    if media_type.essence() != expected {
        return Err(unsupported_media_type(
            format!("unsupported Content-Type `{}`; expected {expected}", media_type.essence()),
            &expected,
        ));
    }

    let limit = policy.max_body_size;
    if limit == 0 {
        return Err(payload_too_large("Request body is not allowed", limit));
    }
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(payload_too_large("Request body too large", limit));
    }

    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(payload_too_large("Request body too large", limit))
        }
        Err(e) => Err(ResponseError::server(e)),
    }
}

/// A validated request as seen by a handler.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    remote_addr: SocketAddr,
    request_id: String,
    body: Bytes,
}

impl Request {
    pub fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        remote_addr: SocketAddr,
        request_id: impl Into<String>,
        body: Bytes,
    ) -> Self {
        Self {
            method,
            uri,
            headers,
            remote_addr,
            request_id: request_id.into(),
            body,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Deserialize the body as JSON; a malformed body is a 400.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ResponseError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| bad_request(format!("invalid JSON body: {e}"), e))
    }
}
