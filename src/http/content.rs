//! Precomputed static payloads.
//!
//! A `StaticContent` is built once at registration and is read-only while
//! serving: the raw bytes, a strong ETag, the formatted `Last-Modified`
//! value, the headers every representation carries and any number of
//! pre-encoded variants keyed by content-coding.

use axum::body::Bytes;
use axum::http::header::{self, InvalidHeaderValue};
use axum::http::{HeaderName, HeaderValue};
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::time::SystemTime;
use thiserror::Error;

use crate::http::headers::{format_http_date, IDENTITY};
use crate::http::response::HeaderEntry;

/// Failure while building a [`StaticContent`].
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("failed to compress static content")]
    Compression(#[from] std::io::Error),

    #[error("`{0}` is not a valid content-coding name")]
    InvalidEncoding(String),

    #[error("content-coding `{0}` registered twice")]
    DuplicateEncoding(String),

    #[error("invalid header value in static content")]
    InvalidHeader(#[from] InvalidHeaderValue),
}

/// A pre-encoded representation of a static payload.
#[derive(Debug, Clone)]
pub struct EncodedVariant {
    pub encoding: String,
    pub body: Bytes,
    pub etag: String,
    pub headers: Vec<HeaderEntry>,
}

/// An immutable static payload and its encoded variants.
#[derive(Debug, Clone)]
pub struct StaticContent {
    body: Bytes,
    etag: String,
    last_modified: Option<String>,
    headers: Vec<HeaderEntry>,
    variants: HashMap<String, EncodedVariant>,
    /// Variant encodings, smallest payload first.
    supported: Vec<String>,
}

impl StaticContent {
    pub fn builder(body: impl Into<Bytes>) -> StaticContentBuilder {
        StaticContentBuilder::new(body)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn etag(&self) -> &str {
        &self.etag
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.last_modified.as_deref()
    }

    /// Headers sent with the identity representation.
    pub fn headers(&self) -> &[HeaderEntry] {
        &self.headers
    }

    pub fn variant(&self, encoding: &str) -> Option<&EncodedVariant> {
        self.variants.get(encoding)
    }

    pub fn variants(&self) -> impl Iterator<Item = &EncodedVariant> {
        self.supported.iter().filter_map(|name| self.variants.get(name))
    }

    pub fn supported_encodings(&self) -> &[String] {
        &self.supported
    }
}

/// Strong ETag: quoted hex of the first 16 bytes of the SHA-256 digest.
pub fn compute_etag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("\"{}\"", hex::encode(&digest[..16]))
}

fn gzip(body: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body)?;
    encoder.finish()
}

/// Builder for [`StaticContent`].
#[derive(Debug)]
pub struct StaticContentBuilder {
    body: Bytes,
    content_type: Option<HeaderValue>,
    last_modified: Option<SystemTime>,
    headers: Vec<HeaderEntry>,
    gzip: bool,
    variants: Vec<(String, Bytes)>,
}

impl StaticContentBuilder {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            content_type: None,
            last_modified: None,
            headers: Vec::new(),
            gzip: false,
            variants: Vec::new(),
        }
    }

    pub fn content_type(mut self, value: HeaderValue) -> Self {
        self.content_type = Some(value);
        self
    }

    pub fn last_modified(mut self, time: SystemTime) -> Self {
        self.last_modified = Some(time);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push(HeaderEntry::new(name, value));
        self
    }

    /// Precompute a gzip variant at build time.
    pub fn gzip(mut self) -> Self {
        self.gzip = true;
        self
    }

    /// Register an externally encoded variant, e.g. `br` or `zstd`.
    pub fn variant(mut self, encoding: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.variants.push((encoding.into(), body.into()));
        self
    }

    pub fn build(self) -> Result<StaticContent, ContentError> {
        let mut encoded = Vec::with_capacity(self.variants.len() + 1);
        if self.gzip {
            encoded.push(("gzip".to_string(), Bytes::from(gzip(&self.body)?)));
        }
        for (name, body) in self.variants {
            let name = name.trim().to_ascii_lowercase();
            if name.is_empty() || name == IDENTITY || name == "*" || name.contains([',', ';', ' ']) {
                return Err(ContentError::InvalidEncoding(name));
            }
            if encoded.iter().any(|(existing, _)| *existing == name) {
                return Err(ContentError::DuplicateEncoding(name));
            }
            encoded.push((name, body));
        }

        let last_modified = self.last_modified.map(format_http_date);

        // Shared by every representation.
        let mut common = Vec::new();
        if let Some(content_type) = &self.content_type {
            common.push(HeaderEntry::new(header::CONTENT_TYPE, content_type.clone()));
        }
        if let Some(last_modified) = &last_modified {
            common.push(HeaderEntry::new(
                header::LAST_MODIFIED,
                HeaderValue::from_str(last_modified)?,
            ));
        }
        common.extend(self.headers);

        let mut variants = HashMap::new();
        let mut supported: Vec<(usize, String)> = Vec::new();
        for (name, body) in encoded {
            if body.len() >= self.body.len() {
                tracing::debug!(
                    encoding = %name,
                    raw = self.body.len(),
                    encoded = body.len(),
                    "Encoded variant is not smaller; dropped"
                );
                continue;
            }
            let etag = compute_etag(&body);
            let mut headers = common.clone();
            headers.push(HeaderEntry::new(header::ETAG, HeaderValue::from_str(&etag)?));
            headers.push(HeaderEntry::new(
                header::CONTENT_ENCODING,
                HeaderValue::from_str(&name)?,
            ));
            headers.push(HeaderEntry::new(
                header::VARY,
                HeaderValue::from_static("Accept-Encoding"),
            ));
            supported.push((body.len(), name.clone()));
            variants.insert(
                name.clone(),
                EncodedVariant {
                    encoding: name,
                    body,
                    etag,
                    headers,
                },
            );
        }
        supported.sort();

        let etag = compute_etag(&self.body);
        let mut headers = common;
        headers.push(HeaderEntry::new(header::ETAG, HeaderValue::from_str(&etag)?));
        if !variants.is_empty() {
            headers.push(HeaderEntry::new(
                header::VARY,
                HeaderValue::from_static("Accept-Encoding"),
            ));
        }

        Ok(StaticContent {
            body: self.body,
            etag,
            last_modified,
            headers,
            variants,
            supported: supported.into_iter().map(|(_, name)| name).collect(),
        })
    }
}
