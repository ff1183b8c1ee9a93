//! Header value parsing.
//!
//! # Responsibilities
//! - Parse `Content-Type` into a media type with parameters
//! - Parse `Accept-Encoding` into a quality-ordered coding list
//! - Format and parse RFC 1123 HTTP-dates
//!
//! # Design Decisions
//! - The rest of the pipeline only sees the parsed values
//! - Lenient where the grammar allows it: unknown parameters are kept,
//!   malformed quality values drop the offending coding

use axum::http::{header, HeaderMap};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::time::SystemTime;
use thiserror::Error;

/// Canonical name of the identity content-coding.
pub const IDENTITY: &str = "identity";

/// `strftime` layout of an RFC 1123 HTTP-date.
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Error parsing a `Content-Type` value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MediaTypeError {
    #[error("media type is empty")]
    Empty,

    #[error("media type `{0}` is not of the form type/subtype")]
    MissingSubtype(String),

    #[error("media type `{0}` contains invalid characters")]
    InvalidToken(String),

    #[error("malformed media type parameter `{0}`")]
    InvalidParameter(String),
}

/// Error parsing an HTTP-date.
#[derive(Debug, Error)]
#[error("invalid HTTP-date `{value}`")]
pub struct TimestampError {
    pub value: String,
    #[source]
    source: chrono::ParseError,
}

/// A parsed media type such as `application/json; charset=utf-8`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    essence: String,
    params: Vec<(String, String)>,
}

impl MediaType {
    /// Lower-cased `type/subtype`, without parameters.
    pub fn essence(&self) -> &str {
        &self.essence
    }

    /// Look up a parameter by (case-insensitive) name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl std::str::FromStr for MediaType {
    type Err = MediaTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_media_type(s)
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

/// Parse a media type with optional `; name=value` parameters.
pub fn parse_media_type(value: &str) -> Result<MediaType, MediaTypeError> {
    let mut parts = value.split(';');
    let essence = parts.next().unwrap_or_default().trim();
    if essence.is_empty() {
        return Err(MediaTypeError::Empty);
    }

    let (kind, subtype) = essence
        .split_once('/')
        .ok_or_else(|| MediaTypeError::MissingSubtype(essence.to_string()))?;
    if !is_token(kind) || !is_token(subtype) {
        return Err(MediaTypeError::InvalidToken(essence.to_string()));
    }

    let mut params = Vec::new();
    for raw in parts {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let (name, val) = raw
            .split_once('=')
            .ok_or_else(|| MediaTypeError::InvalidParameter(raw.to_string()))?;
        let name = name.trim();
        let val = val.trim();
        let val = val
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(val);
        if !is_token(name) {
            return Err(MediaTypeError::InvalidParameter(raw.to_string()));
        }
        params.push((name.to_ascii_lowercase(), val.to_string()));
    }

    Ok(MediaType {
        essence: format!("{}/{}", kind.to_ascii_lowercase(), subtype.to_ascii_lowercase()),
        params,
    })
}

/// One entry of an `Accept-Encoding` list.
#[derive(Debug, Clone, PartialEq)]
pub struct Coding {
    pub name: String,
    pub quality: f32,
}

impl Coding {
    pub fn new(name: impl Into<String>, quality: f32) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            quality,
        }
    }
}

fn parse_coding(raw: &str) -> Option<Coding> {
    let mut parts = raw.split(';');
    let name = parts.next()?.trim();
    if name.is_empty() {
        return None;
    }

    let mut quality = 1.0;
    for param in parts {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("q") {
            quality = value.trim().parse::<f32>().ok()?;
            if !(0.0..=1.0).contains(&quality) {
                return None;
            }
        }
    }
    Some(Coding::new(name, quality))
}

/// Parse every `Accept-Encoding` header into a list ordered by descending
/// quality. Entries with equal quality keep their header order.
pub fn accept_encoding(headers: &HeaderMap) -> Vec<Coding> {
    let mut codings: Vec<Coding> = headers
        .get_all(header::ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(parse_coding)
        .collect();
    codings.sort_by(|a, b| b.quality.total_cmp(&a.quality));
    codings
}

/// Format a point in time as an RFC 1123 HTTP-date.
pub fn format_http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format(HTTP_DATE_FORMAT).to_string()
}

/// Parse an RFC 1123 HTTP-date.
pub fn parse_http_date(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    NaiveDateTime::parse_from_str(value.trim(), HTTP_DATE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|source| TimestampError {
            value: value.to_string(),
            source,
        })
}
