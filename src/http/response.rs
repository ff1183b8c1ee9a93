//! Response model and write discipline.
//!
//! # Responsibilities
//! - `Response`: status, header entries and a flat or streaming body
//! - `ResponseWriter`: tracks write-once state over a `ResponseSink`
//! - Merge configured default headers with per-response headers
//! - Stream chunked bodies, flushing after every chunk
//!
//! # Design Decisions
//! - Body XOR stream is a single enum; no response can carry both
//! - `Content-Type` is dropped when nothing will be sent
//! - HEAD requests keep every header but never touch the body

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use futures_util::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use crate::http::problem::ResponseError;
use crate::http::sink::{BoxError, ResponseSink, WriteError};

/// Lazily produced body chunks.
pub type ChunkStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// A single header line of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderEntry {
    pub name: HeaderName,
    pub value: HeaderValue,
    /// Whether this entry replaces a configured default of the same name.
    pub overwrite: bool,
}

impl HeaderEntry {
    pub fn new(name: HeaderName, value: HeaderValue) -> Self {
        Self {
            name,
            value,
            overwrite: true,
        }
    }

    /// An entry that yields to a configured default of the same name.
    pub fn fallback(name: HeaderName, value: HeaderValue) -> Self {
        Self {
            name,
            value,
            overwrite: false,
        }
    }
}

/// Response payload.
pub enum Body {
    Full(Bytes),
    Stream(ChunkStream),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::Full(Bytes::new())
    }
}

/// A response produced by a handler, the negotiator or the error responder.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Vec<HeaderEntry>,
    pub body: Body,
}

impl Response {
    /// A response with no body.
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Body::default(),
        }
    }

    pub fn bytes(status: StatusCode, content_type: HeaderValue, body: impl Into<Bytes>) -> Self {
        Self::empty(status)
            .with_header(header::CONTENT_TYPE, content_type)
            .with_body(body)
    }

    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self::bytes(
            status,
            HeaderValue::from_static("text/plain; charset=utf-8"),
            body.into(),
        )
    }

    /// Serialize `value` as a JSON body. Serialization failure is a server
    /// error.
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Self, ResponseError> {
        let body = serde_json::to_vec(value).map_err(ResponseError::server)?;
        Ok(Self::bytes(
            status,
            HeaderValue::from_static("application/json"),
            body,
        ))
    }

    /// A chunked response whose body is produced lazily.
    pub fn stream<S, E>(status: StatusCode, content_type: HeaderValue, chunks: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self {
            status,
            headers: vec![HeaderEntry::new(header::CONTENT_TYPE, content_type)],
            body: Body::Stream(chunks.map_err(Into::<BoxError>::into).boxed()),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Body::Full(body.into());
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push(HeaderEntry::new(name, value));
        self
    }

    pub fn with_entries(mut self, entries: impl IntoIterator<Item = HeaderEntry>) -> Self {
        self.headers.extend(entries);
        self
    }

    /// First value of a header, if present.
    pub fn header(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|entry| entry.name == *name)
            .map(|entry| &entry.value)
    }
}

/// Combine response entries with configured defaults.
///
/// Overwriting entries replace the default of the same name; non-overwriting
/// entries yield to it. Defaults are skipped only for names the response
/// actually set.
fn merge_headers(defaults: &[HeaderEntry], entries: Vec<HeaderEntry>, body_empty: bool) -> HeaderMap {
    let default_names: HashSet<&HeaderName> = defaults.iter().map(|d| &d.name).collect();
    let mut claimed: HashSet<HeaderName> = HashSet::new();
    let mut merged = HeaderMap::new();

    for entry in entries {
        if body_empty && entry.name == header::CONTENT_TYPE {
            continue;
        }
        if claimed.contains(&entry.name) {
            merged.append(entry.name, entry.value);
            continue;
        }
        if !entry.overwrite && default_names.contains(&entry.name) {
            continue;
        }
        claimed.insert(entry.name.clone());
        merged.insert(entry.name, entry.value);
    }

    for default in defaults {
        if claimed.contains(&default.name) {
            continue;
        }
        if body_empty && default.name == header::CONTENT_TYPE {
            continue;
        }
        merged.append(default.name.clone(), default.value.clone());
    }
    merged
}

/// Per-request writer over a [`ResponseSink`].
pub struct ResponseWriter<'a> {
    sink: &'a mut dyn ResponseSink,
    defaults: &'a [HeaderEntry],
    header_written: bool,
    write_called: bool,
    status: Option<StatusCode>,
    captured: Option<Vec<u8>>,
    is_head: bool,
}

impl<'a> ResponseWriter<'a> {
    pub fn new(sink: &'a mut dyn ResponseSink, defaults: &'a [HeaderEntry], is_head: bool) -> Self {
        Self {
            sink,
            defaults,
            header_written: false,
            write_called: false,
            status: None,
            captured: None,
            is_head,
        }
    }

    /// Keep a copy of every body byte sent, for logging.
    pub fn capture_body(mut self, enabled: bool) -> Self {
        self.captured = enabled.then(Vec::new);
        self
    }

    pub fn header_written(&self) -> bool {
        self.header_written
    }

    pub fn write_called(&self) -> bool {
        self.write_called
    }

    /// Status of the written header, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn is_head(&self) -> bool {
        self.is_head
    }

    pub fn captured_body(&self) -> Option<&[u8]> {
        self.captured.as_deref()
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.sink.headers_mut()
    }

    pub fn write_header(&mut self, status: StatusCode) {
        if self.header_written {
            tracing::warn!(
                status = status.as_u16(),
                previous = self.status.map(|s| s.as_u16()),
                "Superfluous write_header ignored"
            );
            return;
        }
        self.header_written = true;
        self.status = Some(status);
        self.sink.write_header(status);
    }

    /// Write body bytes, synthesising a 200 (or 204 for empty data) header
    /// first if none was written.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        if !self.header_written {
            let status = if data.is_empty() {
                StatusCode::NO_CONTENT
            } else {
                StatusCode::OK
            };
            self.write_header(status);
        }
        self.write_called = true;

        if self.is_head || data.is_empty() {
            return Ok(0);
        }
        let written = self.sink.write(data)?;
        if let Some(captured) = self.captured.as_mut() {
            captured.extend_from_slice(&data[..written]);
        }
        Ok(written)
    }

    fn flush(&mut self) -> Result<(), WriteError> {
        self.sink
            .flusher()
            .ok_or(WriteError::NotFlushable)?
            .flush()
    }

    fn apply_headers(&mut self, merged: HeaderMap) {
        let target = self.sink.headers_mut();
        for name in merged.keys() {
            target.remove(name);
        }
        for (name, value) in merged.iter() {
            target.append(name.clone(), value.clone());
        }
    }

    /// Write a complete response: merged headers, status, then the body.
    pub async fn write_response(&mut self, response: Response) -> Result<(), WriteError> {
        let Response {
            status,
            headers,
            body,
        } = response;

        match body {
            Body::Full(bytes) => {
                let merged = merge_headers(self.defaults, headers, bytes.is_empty());
                self.apply_headers(merged);
                if self.is_head && !bytes.is_empty() {
                    self.sink
                        .headers_mut()
                        .insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                }
                self.write_header(status);
                if !bytes.is_empty() {
                    self.write(&bytes)?;
                }
                Ok(())
            }
            Body::Stream(chunks) => self.write_stream(status, headers, chunks).await,
        }
    }

    async fn write_stream(
        &mut self,
        status: StatusCode,
        headers: Vec<HeaderEntry>,
        mut chunks: ChunkStream,
    ) -> Result<(), WriteError> {
        if self.sink.flusher().is_none() {
            tracing::error!("Streaming response requires a flushable sink");
            return Err(WriteError::NotFlushable);
        }
        if self.sink.headers().contains_key(header::TRANSFER_ENCODING)
            || headers.iter().any(|e| e.name == header::TRANSFER_ENCODING)
        {
            tracing::error!("Streaming response already carries Transfer-Encoding");
            return Err(WriteError::TransferEncodingAlreadySet);
        }

        let first = chunks.next().await;
        let merged = merge_headers(self.defaults, headers, first.is_none());
        self.apply_headers(merged);
        self.sink.headers_mut().insert(
            header::TRANSFER_ENCODING,
            HeaderValue::from_static("chunked"),
        );
        self.write_header(status);

        if self.is_head {
            return self.write(&[]).map(|_| ());
        }

        let mut next = first;
        while let Some(chunk) = next {
            match chunk {
                Ok(bytes) => {
                    self.write(&bytes)?;
                    self.flush()?;
                }
                Err(e) => {
                    self.sink.abort();
                    return Err(WriteError::Stream(e));
                }
            }
            next = chunks.next().await;
        }
        self.write(&[])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::sink::BufferSink;
    use futures_util::stream;

    fn defaults() -> Vec<HeaderEntry> {
        vec![
            HeaderEntry::new(
                HeaderName::from_static("x-frame-options"),
                HeaderValue::from_static("DENY"),
            ),
            HeaderEntry::new(
                HeaderName::from_static("cache-control"),
                HeaderValue::from_static("no-store"),
            ),
        ]
    }

    #[test]
    fn test_write_synthesises_header() {
        let mut sink = BufferSink::new();
        let mut writer = ResponseWriter::new(&mut sink, &[], false);
        writer.write(b"abc").unwrap();
        assert!(writer.header_written());
        assert!(writer.write_called());
        assert_eq!(writer.status(), Some(StatusCode::OK));
        assert_eq!(sink.body(), b"abc");

        let mut sink = BufferSink::new();
        let mut writer = ResponseWriter::new(&mut sink, &[], false);
        writer.write(b"").unwrap();
        assert_eq!(writer.status(), Some(StatusCode::NO_CONTENT));
    }

    #[test]
    fn test_status_is_fixed_after_first_header() {
        let mut sink = BufferSink::new();
        let mut writer = ResponseWriter::new(&mut sink, &[], false);
        writer.write_header(StatusCode::ACCEPTED);
        writer.write_header(StatusCode::NOT_FOUND);
        assert_eq!(writer.status(), Some(StatusCode::ACCEPTED));
        assert_eq!(sink.status(), Some(StatusCode::ACCEPTED));
    }

    #[test]
    fn test_head_write_is_tracked_but_not_sent() {
        let mut sink = BufferSink::new();
        let mut writer = ResponseWriter::new(&mut sink, &[], true).capture_body(true);
        writer.write(b"hidden").unwrap();
        assert!(writer.write_called());
        assert_eq!(writer.captured_body(), Some(&b""[..]));
        assert!(sink.body().is_empty());
    }

    #[tokio::test]
    async fn test_head_response_keeps_length() {
        let mut sink = BufferSink::new();
        let mut writer = ResponseWriter::new(&mut sink, &[], true);
        writer
            .write_response(Response::text(StatusCode::OK, "hello"))
            .await
            .unwrap();
        assert_eq!(sink.status(), Some(StatusCode::OK));
        assert_eq!(sink.headers()[header::CONTENT_LENGTH], "5");
        assert_eq!(sink.headers()[header::CONTENT_TYPE], "text/plain; charset=utf-8");
        assert!(sink.body().is_empty());
    }

    #[tokio::test]
    async fn test_defaults_merge_with_response_headers() {
        let defaults = defaults();
        let mut sink = BufferSink::new();
        let mut writer = ResponseWriter::new(&mut sink, &defaults, false);
        let response = Response::text(StatusCode::OK, "hi")
            .with_header(header::CACHE_CONTROL, HeaderValue::from_static("max-age=60"))
            .with_entries([HeaderEntry::fallback(
                HeaderName::from_static("x-frame-options"),
                HeaderValue::from_static("SAMEORIGIN"),
            )]);
        writer.write_response(response).await.unwrap();

        let headers = sink.headers();
        assert_eq!(headers[header::CACHE_CONTROL], "max-age=60");
        assert_eq!(headers["x-frame-options"], "DENY");
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(sink.body(), b"hi");
    }

    #[tokio::test]
    async fn test_content_type_dropped_for_empty_body() {
        let mut sink = BufferSink::new();
        let mut writer = ResponseWriter::new(&mut sink, &[], false);
        let response = Response::bytes(
            StatusCode::OK,
            HeaderValue::from_static("application/json"),
            Bytes::new(),
        );
        writer.write_response(response).await.unwrap();
        assert!(!sink.headers().contains_key(header::CONTENT_TYPE));
    }

    #[tokio::test]
    async fn test_stream_writes_and_flushes_each_chunk() {
        let chunks = stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"a")),
            Ok(Bytes::from_static(b"b")),
            Ok(Bytes::from_static(b"c")),
        ]);
        let mut sink = BufferSink::new();
        let mut writer = ResponseWriter::new(&mut sink, &[], false);
        writer
            .write_response(Response::stream(
                StatusCode::OK,
                HeaderValue::from_static("text/plain"),
                chunks,
            ))
            .await
            .unwrap();

        assert_eq!(sink.body(), b"abc");
        assert_eq!(sink.flushes(), 3);
        assert_eq!(sink.headers()[header::TRANSFER_ENCODING], "chunked");
    }

    #[tokio::test]
    async fn test_stream_requires_flushable_sink() {
        let chunks = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"a"))]);
        let mut sink = BufferSink::unflushable();
        let mut writer = ResponseWriter::new(&mut sink, &[], false);
        let result = writer
            .write_response(Response::stream(
                StatusCode::OK,
                HeaderValue::from_static("text/plain"),
                chunks,
            ))
            .await;
        assert!(matches!(result, Err(WriteError::NotFlushable)));
        assert!(!writer.header_written());
    }

    #[tokio::test]
    async fn test_stream_rejects_existing_transfer_encoding() {
        let chunks = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"a"))]);
        let mut sink = BufferSink::new();
        sink.headers_mut()
            .insert(header::TRANSFER_ENCODING, HeaderValue::from_static("gzip"));
        let mut writer = ResponseWriter::new(&mut sink, &[], false);
        let result = writer
            .write_response(Response::stream(
                StatusCode::OK,
                HeaderValue::from_static("text/plain"),
                chunks,
            ))
            .await;
        assert!(matches!(result, Err(WriteError::TransferEncodingAlreadySet)));
    }

    #[tokio::test]
    async fn test_stream_error_aborts() {
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"a")),
            Err(std::io::Error::other("producer failed")),
            Ok(Bytes::from_static(b"never")),
        ]);
        let mut sink = BufferSink::new();
        let mut writer = ResponseWriter::new(&mut sink, &[], false);
        let result = writer
            .write_response(Response::stream(
                StatusCode::OK,
                HeaderValue::from_static("text/plain"),
                chunks,
            ))
            .await;
        assert!(matches!(result, Err(WriteError::Stream(_))));
        assert_eq!(sink.body(), b"a");
        assert!(sink.aborted());
    }
}
