//! Problem details and error responses.
//!
//! # Responsibilities
//! - RFC 7807 `ProblemDetail` bodies
//! - `ResponseError`: classify a failure as client, server or invalid
//! - Render a `ResponseError` into an `application/problem+json` response
//! - `DefaultResponder`: log by severity and write the problem response
//!
//! # Design Decisions
//! - Validators and negotiators return `ResponseError`; only the dispatcher
//!   writes
//! - Server errors without an explicit problem expose a generic 500 only
//! - A header that is already written is never replaced

use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

use crate::http::response::{Body, HeaderEntry, Response, ResponseWriter};
use crate::http::sink::BoxError;

/// Media type of problem-detail bodies.
pub const PROBLEM_JSON: &str = "application/problem+json";

fn is_zero(status: &u16) -> bool {
    *status == 0
}

/// RFC 7807 problem detail. Empty members are omitted when serialized;
/// extension members are flattened to the top level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProblemDetail {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub problem_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub status: u16,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instance: String,

    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

impl ProblemDetail {
    /// A problem with the status's canonical reason as title.
    pub fn new(status: StatusCode) -> Self {
        Self {
            title: status.canonical_reason().unwrap_or_default().to_string(),
            status: status.as_u16(),
            ..Self::default()
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_type(mut self, problem_type: impl Into<String>) -> Self {
        self.problem_type = problem_type.into();
        self
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }
}

/// Classification of a [`ResponseError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Client,
    Server,
    Invalid,
}

/// A `ResponseError` that cannot be turned into a response.
#[derive(Debug, Error)]
pub enum ResponseStateError {
    #[error("response error has both a client and a server cause")]
    BothCausesSet,

    #[error("response error has neither a problem detail nor a cause")]
    Unclassified,

    #[error("problem detail has no status")]
    MissingStatus,

    #[error("problem detail status {0} is not a valid HTTP status")]
    InvalidStatus(u16),

    #[error("failed to serialize problem detail")]
    Serialize(#[from] serde_json::Error),
}

/// A failure on the way to a response.
#[derive(Default)]
pub struct ResponseError {
    pub problem: Option<ProblemDetail>,
    pub headers: Vec<HeaderEntry>,
    pub client_error: Option<BoxError>,
    pub server_error: Option<BoxError>,
}

impl ResponseError {
    /// A client error with an explicit problem detail.
    pub fn client(problem: ProblemDetail, cause: impl Into<BoxError>) -> Self {
        Self {
            problem: Some(problem),
            client_error: Some(cause.into()),
            ..Self::default()
        }
    }

    /// A server error. The body will be a generic 500.
    pub fn server(cause: impl Into<BoxError>) -> Self {
        Self {
            server_error: Some(cause.into()),
            ..Self::default()
        }
    }

    /// An error described by its problem detail alone.
    pub fn from_problem(problem: ProblemDetail) -> Self {
        Self {
            problem: Some(problem),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push(HeaderEntry::new(name, value));
        self
    }

    /// The status this error will be reported with, when known.
    pub fn status(&self) -> Option<u16> {
        match (&self.problem, &self.server_error, &self.client_error) {
            (Some(problem), _, _) => Some(problem.status),
            (None, Some(_), _) => Some(500),
            (None, None, Some(_)) => Some(400),
            _ => None,
        }
    }

    pub fn error_type(&self) -> ErrorType {
        if self.server_error.is_some() {
            return ErrorType::Server;
        }
        if self.client_error.is_some() {
            return ErrorType::Client;
        }
        match self.problem.as_ref().map(|p| p.status) {
            Some(400..=499) => ErrorType::Client,
            Some(500..=599) => ErrorType::Server,
            _ => ErrorType::Invalid,
        }
    }

    pub fn effective_problem_detail(&self) -> Result<ProblemDetail, ResponseStateError> {
        if let Some(problem) = &self.problem {
            return Ok(problem.clone());
        }
        match (&self.server_error, &self.client_error) {
            (Some(_), Some(_)) => Err(ResponseStateError::BothCausesSet),
            (Some(_), None) => Ok(ProblemDetail::new(StatusCode::INTERNAL_SERVER_ERROR)),
            (None, Some(_)) => Ok(ProblemDetail::new(StatusCode::BAD_REQUEST)),
            (None, None) => Err(ResponseStateError::Unclassified),
        }
    }

    /// Render as an `application/problem+json` response.
    pub fn make_response(&self) -> Result<Response, ResponseStateError> {
        let problem = self.effective_problem_detail()?;
        if problem.status == 0 {
            return Err(ResponseStateError::MissingStatus);
        }
        let status = StatusCode::from_u16(problem.status)
            .map_err(|_| ResponseStateError::InvalidStatus(problem.status))?;
        let body = serde_json::to_vec(&problem)?;

        let mut headers: Vec<HeaderEntry> = self
            .headers
            .iter()
            .filter(|entry| entry.name != header::CONTENT_TYPE)
            .cloned()
            .collect();
        headers.push(HeaderEntry::new(
            header::CONTENT_TYPE,
            HeaderValue::from_static(PROBLEM_JSON),
        ));

        Ok(Response {
            status,
            headers,
            body: Body::Full(body.into()),
        })
    }
}

impl fmt::Debug for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseError")
            .field("problem", &self.problem)
            .field("headers", &self.headers)
            .field("client_error", &self.client_error.as_ref().map(|e| e.to_string()))
            .field("server_error", &self.server_error.as_ref().map(|e| e.to_string()))
            .finish()
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(cause) = self.server_error.as_ref().or(self.client_error.as_ref()) {
            return write!(f, "{cause}");
        }
        match &self.problem {
            Some(problem) if problem.detail.is_empty() => {
                write!(f, "{} {}", problem.status, problem.title)
            }
            Some(problem) => write!(f, "{} {}: {}", problem.status, problem.title, problem.detail),
            None => f.write_str("unclassified response error"),
        }
    }
}

impl std::error::Error for ResponseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.server_error
            .as_ref()
            .or(self.client_error.as_ref())
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Reports a [`ResponseError`] through the in-flight writer.
pub trait ErrorResponder: Send + Sync {
    fn respond<'a, 'w: 'a>(
        &'a self,
        writer: Option<&'a mut ResponseWriter<'w>>,
        error: ResponseError,
    ) -> BoxFuture<'a, ()>;
}

/// Logs client errors as warnings and everything else as errors, then
/// writes the problem response unless a header already went out.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultResponder;

impl ErrorResponder for DefaultResponder {
    fn respond<'a, 'w: 'a>(
        &'a self,
        writer: Option<&'a mut ResponseWriter<'w>>,
        error: ResponseError,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let Some(writer) = writer else {
                tracing::error!(error = %error, "No response writer; error cannot be reported");
                return;
            };

            match error.error_type() {
                ErrorType::Client => {
                    tracing::warn!(status = error.status(), error = %error, "Client error");
                }
                ErrorType::Server => {
                    tracing::error!(status = error.status(), error = %error, "Server error");
                }
                ErrorType::Invalid => {
                    tracing::error!(error = ?error, "Unclassifiable response error");
                    return;
                }
            }

            if writer.header_written() {
                tracing::debug!("Header already written; error response skipped");
                return;
            }

            let response = match error.make_response() {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to build error response");
                    return;
                }
            };
            if let Err(e) = writer.write_response(response).await {
                tracing::error!(error = %e, "Failed to write error response");
            }
        })
    }
}
