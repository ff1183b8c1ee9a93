//! Output sinks underneath the response writer.
//!
//! # Responsibilities
//! - Define the `ResponseSink` seam the writer writes through
//! - `HyperSink`: hands a committed response head to axum and feeds
//!   body chunks through a channel once flushed
//! - `BufferSink`: in-memory sink for tests and offline rendering
//!
//! # Design Decisions
//! - Writes are synchronous; flushing is the only point where bytes leave
//!   the process
//! - The first status written wins, later calls are ignored
//! - A sink dropped without ever being written reports 500

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, StatusCode};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Boxed error type used across the pipeline.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure while writing a response.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("response sink does not support incremental flushing")]
    NotFlushable,

    #[error("Transfer-Encoding is already set; refusing to stream")]
    TransferEncodingAlreadySet,

    #[error("streaming body producer failed")]
    Stream(#[source] BoxError),

    #[error("client disconnected")]
    Disconnected,
}

/// Incremental flushing capability of a sink.
pub trait Flush {
    fn flush(&mut self) -> Result<(), WriteError>;
}

/// The underlying output of a single response.
pub trait ResponseSink: Send {
    fn headers(&self) -> &HeaderMap;

    fn headers_mut(&mut self) -> &mut HeaderMap;

    fn write_header(&mut self, status: StatusCode);

    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError>;

    /// Flushing support, if the sink has any.
    fn flusher(&mut self) -> Option<&mut dyn Flush>;

    /// Mark an in-progress body as truncated.
    fn abort(&mut self) {}
}

/// Receives the response head produced by a [`HyperSink`].
pub struct PendingResponse {
    rx: oneshot::Receiver<axum::response::Response>,
}

impl PendingResponse {
    /// Wait until the sink commits a head. A sink that vanishes without
    /// committing yields a bare 500.
    pub async fn into_response(self) -> axum::response::Response {
        match self.rx.await {
            Ok(response) => response,
            Err(_) => {
                let mut response = axum::response::Response::new(Body::empty());
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
            }
        }
    }
}

/// Sink bridging the writer onto an axum response.
///
/// Nothing reaches the client until the first flush or [`HyperSink::finish`].
/// A flush commits the head with a channel-backed streaming body; `finish`
/// before any flush commits the head with the buffered bytes as a flat body.
pub struct HyperSink {
    status: Option<StatusCode>,
    headers: HeaderMap,
    buffer: Vec<u8>,
    head_tx: Option<oneshot::Sender<axum::response::Response>>,
    chunk_tx: Option<mpsc::UnboundedSender<Result<Bytes, std::io::Error>>>,
}

impl HyperSink {
    pub fn new() -> (Self, PendingResponse) {
        let (tx, rx) = oneshot::channel();
        let sink = Self {
            status: None,
            headers: HeaderMap::new(),
            buffer: Vec::new(),
            head_tx: Some(tx),
            chunk_tx: None,
        };
        (sink, PendingResponse { rx })
    }

    fn commit(&mut self, body: Body) -> Result<(), WriteError> {
        let tx = self.head_tx.take().ok_or(WriteError::Disconnected)?;
        let mut response = axum::response::Response::new(body);
        *response.status_mut() = self.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        *response.headers_mut() = std::mem::take(&mut self.headers);
        tx.send(response).map_err(|_| WriteError::Disconnected)
    }

    /// Commit whatever is pending and close the body.
    pub fn finish(&mut self) {
        if self.head_tx.is_some() {
            let body = Body::from(std::mem::take(&mut self.buffer));
            if self.commit(body).is_err() {
                tracing::debug!("Response receiver dropped before commit");
            }
            return;
        }
        if let Some(tx) = self.chunk_tx.take() {
            if !self.buffer.is_empty() {
                let _ = tx.send(Ok(Bytes::from(std::mem::take(&mut self.buffer))));
            }
        }
    }
}

impl Drop for HyperSink {
    fn drop(&mut self) {
        self.finish();
    }
}

impl ResponseSink for HyperSink {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        if self.head_tx.is_some() && self.status.is_none() {
            self.status = Some(status);
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        if self.head_tx.is_none() && self.chunk_tx.is_none() {
            return Err(WriteError::Disconnected);
        }
        self.buffer.extend_from_slice(data);
        Ok(data.len())
    }

    fn flusher(&mut self) -> Option<&mut dyn Flush> {
        Some(self)
    }

    fn abort(&mut self) {
        if let Some(tx) = self.chunk_tx.take() {
            let _ = tx.send(Err(std::io::Error::other("response stream aborted")));
        }
        self.buffer.clear();
    }
}

impl Flush for HyperSink {
    fn flush(&mut self) -> Result<(), WriteError> {
        if self.head_tx.is_some() {
            let (tx, rx) = mpsc::unbounded_channel();
            let chunks = futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|chunk| (chunk, rx))
            });
            self.commit(Body::from_stream(chunks))?;
            self.chunk_tx = Some(tx);
        }

        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::from(std::mem::take(&mut self.buffer));
        match &self.chunk_tx {
            Some(tx) => tx.send(Ok(chunk)).map_err(|_| WriteError::Disconnected),
            None => Err(WriteError::Disconnected),
        }
    }
}

/// In-memory sink recording everything written to it.
#[derive(Debug)]
pub struct BufferSink {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
    flushable: bool,
    flushes: usize,
    aborted: bool,
}

impl BufferSink {
    pub fn new() -> Self {
        Self {
            status: None,
            headers: HeaderMap::new(),
            body: Vec::new(),
            flushable: true,
            flushes: 0,
            aborted: false,
        }
    }

    /// A sink without flushing support; streaming into it must fail.
    pub fn unflushable() -> Self {
        Self {
            flushable: false,
            ..Self::new()
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }

    pub fn aborted(&self) -> bool {
        self.aborted
    }
}

impl Default for BufferSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseSink for BufferSink {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        self.status.get_or_insert(status);
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        self.body.extend_from_slice(data);
        Ok(data.len())
    }

    fn flusher(&mut self) -> Option<&mut dyn Flush> {
        if self.flushable {
            Some(self)
        } else {
            None
        }
    }

    fn abort(&mut self) {
        self.aborted = true;
    }
}

impl Flush for BufferSink {
    fn flush(&mut self) -> Result<(), WriteError> {
        self.flushes += 1;
        Ok(())
    }
}
