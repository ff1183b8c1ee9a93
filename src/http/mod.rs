//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, timeout)
//!     → dispatch.rs (one task per request)
//!     → [routing table resolves the endpoint]
//!     → [rate-limit policy claims a slot]
//!     → negotiation.rs + content.rs (static payloads)
//!       or request.rs (validate body) → handler
//!     → response.rs (merge headers, write or stream) → sink.rs
//!     → problem.rs on any failure
//!     → Send to client
//! ```

pub mod content;
pub mod dispatch;
pub mod headers;
pub mod negotiation;
pub mod problem;
pub mod request;
pub mod response;
pub mod server;
pub mod sink;

pub use content::StaticContent;
pub use dispatch::{Mux, MuxOptions, X_REQUEST_ID};
pub use problem::{DefaultResponder, ErrorResponder, ErrorType, ProblemDetail, ResponseError};
pub use request::Request;
pub use response::{HeaderEntry, Response, ResponseWriter};
pub use server::HttpServer;
pub use sink::{BufferSink, HyperSink, ResponseSink};
