//! Content negotiation.
//!
//! # Responsibilities
//! - Evaluate conditional-cache headers against a representation
//! - Pick a content-coding from the client's quality-ordered preferences
//! - Serve a `StaticContent` payload: 304, identity or an encoded variant
//!
//! # Design Decisions
//! - Everything here is synchronous and never writes; failures are returned
//!   as `ResponseError`s
//! - `None` from the encoding negotiation means nothing acceptable is left

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};

use crate::http::content::StaticContent;
use crate::http::headers::{accept_encoding, parse_http_date, Coding, IDENTITY};
use crate::http::problem::{ProblemDetail, ResponseError};
use crate::http::response::{HeaderEntry, Response};

/// Whether the client already holds the representation identified by
/// `etag` and `last_modified`.
///
/// A malformed `If-Modified-Since` is the client's fault; a malformed stored
/// `Last-Modified` is ours.
pub fn is_cached(
    headers: &HeaderMap,
    etag: &str,
    last_modified: Option<&str>,
) -> Result<bool, ResponseError> {
    if let Some(if_none_match) = headers.get(header::IF_NONE_MATCH) {
        if if_none_match.as_bytes() == etag.as_bytes() {
            return Ok(true);
        }
    }

    let (Some(since), Some(last_modified)) = (headers.get(header::IF_MODIFIED_SINCE), last_modified)
    else {
        return Ok(false);
    };

    let bad_timestamp = |cause: Box<dyn std::error::Error + Send + Sync>| {
        ResponseError::client(
            ProblemDetail::new(StatusCode::BAD_REQUEST).with_detail("bad timestamp"),
            cause,
        )
    };
    let since = since.to_str().map_err(|e| bad_timestamp(e.into()))?;
    let since = parse_http_date(since).map_err(|e| bad_timestamp(e.into()))?;
    let modified = parse_http_date(last_modified).map_err(ResponseError::server)?;

    Ok(modified <= since)
}

/// Choose a content-coding.
///
/// `codings` must be ordered by descending quality; `supported` holds the
/// available encodings, smallest payload first.
pub fn get_matching_content_encoding<'a>(
    codings: &[Coding],
    supported: &'a [String],
) -> Option<&'a str> {
    let mut identity_allowed = true;

    for coding in codings {
        let refused = coding.quality == 0.0;
        match coding.name.as_str() {
            "*" if refused => identity_allowed = false,
            "*" => {
                return supported
                    .first()
                    .map(String::as_str)
                    .or(identity_allowed.then_some(IDENTITY));
            }
            IDENTITY if refused => identity_allowed = false,
            IDENTITY => return Some(IDENTITY),
            _ if refused => {}
            name => {
                if let Some(found) = supported.iter().find(|s| s.as_str() == name) {
                    return Some(found.as_str());
                }
            }
        }
    }

    identity_allowed.then_some(IDENTITY)
}

fn not_modified(headers: &[HeaderEntry]) -> Response {
    Response::empty(StatusCode::NOT_MODIFIED).with_entries(headers.iter().cloned())
}

/// Serve a static payload for a request carrying `headers`.
pub fn serve_static(content: &StaticContent, headers: &HeaderMap) -> Result<Response, ResponseError> {
    let last_modified = content.last_modified();
    if is_cached(headers, content.etag(), last_modified)? {
        return Ok(not_modified(content.headers()));
    }
    for variant in content.variants() {
        if is_cached(headers, &variant.etag, last_modified)? {
            return Ok(not_modified(&variant.headers));
        }
    }

    let codings = accept_encoding(headers);
    match get_matching_content_encoding(&codings, content.supported_encodings()) {
        Some(IDENTITY) => Ok(Response::empty(StatusCode::OK)
            .with_entries(content.headers().iter().cloned())
            .with_body(content.body().clone())),
        Some(encoding) => {
            let variant = content.variant(encoding).ok_or_else(|| {
                ResponseError::server(format!("negotiated unknown encoding `{encoding}`"))
            })?;
            Ok(Response::empty(StatusCode::OK)
                .with_entries(variant.headers.iter().cloned())
                .with_body(variant.body.clone()))
        }
        None => {
            let mut offered: Vec<&str> = content
                .supported_encodings()
                .iter()
                .map(String::as_str)
                .collect();
            offered.push(IDENTITY);
            let offered = offered.join(", ");
            let value = HeaderValue::from_str(&offered).map_err(ResponseError::server)?;
            Err(ResponseError::client(
                ProblemDetail::new(StatusCode::UNSUPPORTED_MEDIA_TYPE)
                    .with_detail(format!("no acceptable content-coding; available: {offered}")),
                "content-coding negotiation failed",
            )
            .with_header(header::ACCEPT_ENCODING, value))
        }
    }
}
