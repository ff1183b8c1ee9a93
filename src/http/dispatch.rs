//! Per-request orchestration.
//!
//! # Data Flow
//! ```text
//! http::Request + remote address + ResponseSink
//!     → RouteTable::resolve (404 / 405 / OPTIONS)
//!     → RateLimitPolicy::check (429)
//!     → static: serve_static (304 / 415)
//!       handler: read_validated_body (411 / 400 / 415 / 413) → Handler::call
//!     → ResponseWriter::write_response
//!     → on any error: ErrorResponder
//! ```
//!
//! # Design Decisions
//! - The dispatcher is the only component that writes; everything upstream
//!   returns `ResponseError`
//! - Write failures are reported through the same responder, which never
//!   overwrites a header already sent

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use crate::config::MuxConfig;
use crate::http::negotiation::serve_static;
use crate::http::problem::{DefaultResponder, ErrorResponder, ProblemDetail, ResponseError};
use crate::http::request::{read_validated_body, BodyPolicy, Request};
use crate::http::response::{HeaderEntry, Response, ResponseWriter};
use crate::http::sink::ResponseSink;
use crate::observability::metrics;
use crate::routing::{Action, Resolution, RouteTable};

/// Request ID header, set by the server's request-id layer.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Multiplexer-wide defaults.
#[derive(Debug, Clone)]
pub struct MuxOptions {
    /// Expected request `type/subtype` unless an endpoint overrides it.
    pub default_content_type: String,
    /// Body ceiling in bytes unless an endpoint overrides it.
    pub max_body_size: usize,
    /// Headers merged into every response.
    pub default_headers: Vec<HeaderEntry>,
    /// Log response bodies at debug level.
    pub capture_body: bool,
}

impl Default for MuxOptions {
    fn default() -> Self {
        Self {
            default_content_type: "application/json".to_string(),
            max_body_size: 1024 * 1024,
            default_headers: Vec::new(),
            capture_body: false,
        }
    }
}

impl MuxOptions {
    pub fn from_config(config: &MuxConfig) -> Self {
        let default_headers = config
            .response
            .default_headers
            .iter()
            .filter_map(|h| {
                match (
                    HeaderName::from_bytes(h.name.as_bytes()),
                    HeaderValue::from_str(&h.value),
                ) {
                    (Ok(name), Ok(value)) => Some(HeaderEntry::new(name, value)),
                    _ => {
                        tracing::warn!(header = %h.name, "Skipping invalid default header");
                        None
                    }
                }
            })
            .collect();

        Self {
            default_content_type: config.request.default_content_type.clone(),
            max_body_size: config.request.max_body_size,
            default_headers,
            capture_body: config.response.capture_body,
        }
    }

    pub fn with_default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.push(HeaderEntry::new(name, value));
        self
    }
}

/// The request multiplexer.
pub struct Mux {
    routes: Arc<RouteTable>,
    options: MuxOptions,
    responder: Arc<dyn ErrorResponder>,
}

impl Mux {
    pub fn new(routes: RouteTable, options: MuxOptions) -> Self {
        Self {
            routes: Arc::new(routes),
            options,
            responder: Arc::new(DefaultResponder),
        }
    }

    pub fn with_responder(mut self, responder: Arc<dyn ErrorResponder>) -> Self {
        self.responder = responder;
        self
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn options(&self) -> &MuxOptions {
        &self.options
    }

    /// Handle one request end to end, writing the outcome to `sink`.
    pub async fn dispatch(
        &self,
        request: axum::http::Request<Body>,
        remote: SocketAddr,
        sink: &mut dyn ResponseSink,
    ) {
        let start = Instant::now();
        let (parts, body) = request.into_parts();
        let request_id = parts
            .headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let span = tracing::info_span!(
            "request",
            request_id = %request_id,
            method = %parts.method,
            path = %parts.uri.path(),
        );

        async move {
            tracing::debug!(remote = %remote, "Dispatching request");

            let mut writer = ResponseWriter::new(
                sink,
                &self.options.default_headers,
                parts.method == Method::HEAD,
            )
            .capture_body(self.options.capture_body);

            match self.process(&parts, body, remote, &request_id).await {
                Ok(response) => {
                    if let Err(e) = writer.write_response(response).await {
                        self.responder
                            .respond(Some(&mut writer), ResponseError::server(e))
                            .await;
                    }
                }
                Err(error) => {
                    let error = tag_instance(error, &request_id);
                    self.responder.respond(Some(&mut writer), error).await;
                }
            }

            if let Some(body) = writer.captured_body() {
                tracing::debug!(body = %String::from_utf8_lossy(body), "Response body");
            }
            let status = writer
                .status()
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                .as_u16();
            metrics::record_request(parts.method.as_str(), status, start);
            tracing::debug!(
                status,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Request finished"
            );
        }
        .instrument(span)
        .await
    }

    async fn process(
        &self,
        parts: &Parts,
        body: Body,
        remote: SocketAddr,
        request_id: &str,
    ) -> Result<Response, ResponseError> {
        let spec = match self.routes.resolve(parts.uri.path(), &parts.method)? {
            Resolution::Endpoint(spec) => spec,
            Resolution::Options(response) => return Ok(response),
        };

        if let Some(policy) = &spec.rate_limit {
            policy.check(&parts.headers, remote)?;
        }

        match &spec.action {
            Action::Static(content) => serve_static(content, &parts.headers),
            Action::Handler(handler) => {
                let policy = BodyPolicy {
                    expected_content_type: spec
                        .content_type
                        .clone()
                        .unwrap_or_else(|| self.options.default_content_type.clone()),
                    max_body_size: spec.max_body_size.unwrap_or(self.options.max_body_size),
                };
                let body = read_validated_body(&parts.method, &parts.headers, body, &policy).await?;
                let request = Request::new(
                    parts.method.clone(),
                    parts.uri.clone(),
                    parts.headers.clone(),
                    remote,
                    request_id,
                    body,
                );
                handler.call(request).await
            }
        }
    }
}

/// Give a bare server error a generic 500 problem whose `instance` is the
/// request ID.
fn tag_instance(mut error: ResponseError, request_id: &str) -> ResponseError {
    if error.server_error.is_some() && error.client_error.is_none() && error.problem.is_none() {
        error.problem = Some(
            ProblemDetail::new(StatusCode::INTERNAL_SERVER_ERROR).with_instance(request_id),
        );
    }
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::content::StaticContent;
    use crate::http::problem::ErrorType;
    use crate::http::sink::BufferSink;
    use crate::routing::{handler_fn, EndpointSpecification};
    use crate::security::RateLimitPolicy;
    use axum::http::header;
    use futures_util::future::BoxFuture;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::time::Duration;

    fn remote() -> SocketAddr {
        SocketAddr::from(([192, 0, 2, 1], 40000))
    }

    fn mux() -> Mux {
        let mut routes = RouteTable::new();
        routes.add([
            EndpointSpecification::get(
                "/hello",
                handler_fn(|_| async { Ok(Response::text(StatusCode::OK, "hello")) }),
            ),
            EndpointSpecification::post(
                "/echo",
                handler_fn(|req: Request| async move {
                    let value: Value = req.json()?;
                    Response::json(StatusCode::CREATED, &value)
                }),
            )
            .with_max_body_size(64),
            EndpointSpecification::get(
                "/fail",
                handler_fn(|_| async { Err(ResponseError::server("database unavailable")) }),
            ),
            EndpointSpecification::static_content(
                "/static",
                Arc::new(
                    StaticContent::builder("static body")
                        .content_type(HeaderValue::from_static("text/plain"))
                        .build()
                        .unwrap(),
                ),
            ),
            EndpointSpecification::get(
                "/limited",
                handler_fn(|_| async { Ok(Response::empty(StatusCode::NO_CONTENT)) }),
            )
            .with_rate_limit(RateLimitPolicy::new("test", 1, Duration::from_secs(60))),
        ]);
        let options = MuxOptions::default().with_default_header(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        );
        Mux::new(routes, options)
    }

    fn request(method: Method, uri: &str) -> axum::http::request::Builder {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header(X_REQUEST_ID, "req-42")
    }

    async fn run(mux: &Mux, request: axum::http::Request<Body>) -> BufferSink {
        let mut sink = BufferSink::new();
        mux.dispatch(request, remote(), &mut sink).await;
        sink
    }

    fn problem(sink: &BufferSink) -> Value {
        assert_eq!(sink.headers()[header::CONTENT_TYPE], "application/problem+json");
        serde_json::from_slice(sink.body()).unwrap()
    }

    #[tokio::test]
    async fn test_handler_response_gets_default_headers() {
        let sink = run(&mux(), request(Method::GET, "/hello").body(Body::empty()).unwrap()).await;
        assert_eq!(sink.status(), Some(StatusCode::OK));
        assert_eq!(sink.body(), b"hello");
        assert_eq!(sink.headers()["x-content-type-options"], "nosniff");
    }

    #[tokio::test]
    async fn test_head_has_no_body() {
        let sink = run(&mux(), request(Method::HEAD, "/hello").body(Body::empty()).unwrap()).await;
        assert_eq!(sink.status(), Some(StatusCode::OK));
        assert!(sink.body().is_empty());
        assert_eq!(sink.headers()[header::CONTENT_TYPE], "text/plain; charset=utf-8");
    }

    #[tokio::test]
    async fn test_unknown_path_problem() {
        let sink = run(&mux(), request(Method::GET, "/nope").body(Body::empty()).unwrap()).await;
        assert_eq!(sink.status(), Some(StatusCode::NOT_FOUND));
        let body = problem(&sink);
        assert_eq!(body["status"], 404);
        assert!(body.get("detail").is_none());
    }

    #[tokio::test]
    async fn test_options_synthesised() {
        let sink = run(&mux(), request(Method::OPTIONS, "/echo").body(Body::empty()).unwrap()).await;
        assert_eq!(sink.status(), Some(StatusCode::NO_CONTENT));
        assert_eq!(sink.headers()[header::ALLOW], "OPTIONS, POST");
    }

    #[tokio::test]
    async fn test_echo_validates_and_runs_handler() {
        let sink = run(
            &mux(),
            request(Method::POST, "/echo")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::CONTENT_LENGTH, "11")
                .body(Body::from(r#"{"a":[1,2]}"#))
                .unwrap(),
        )
        .await;
        assert_eq!(sink.status(), Some(StatusCode::CREATED));
        assert_eq!(sink.body(), br#"{"a":[1,2]}"#);
    }

    #[tokio::test]
    async fn test_echo_without_content_type() {
        let sink = run(
            &mux(),
            request(Method::POST, "/echo")
                .header(header::CONTENT_LENGTH, "2")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
        assert_eq!(sink.status(), Some(StatusCode::UNSUPPORTED_MEDIA_TYPE));
        assert_eq!(sink.headers()[header::ACCEPT], "application/json");
        problem(&sink);
    }

    #[tokio::test]
    async fn test_server_error_is_generic_with_instance() {
        let sink = run(&mux(), request(Method::GET, "/fail").body(Body::empty()).unwrap()).await;
        assert_eq!(sink.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        let body = problem(&sink);
        assert_eq!(body["title"], "Internal Server Error");
        assert_eq!(body["instance"], "req-42");
        assert!(body.get("detail").is_none());
    }

    #[tokio::test]
    async fn test_static_and_conditional() {
        let mux = mux();
        let sink = run(&mux, request(Method::GET, "/static").body(Body::empty()).unwrap()).await;
        assert_eq!(sink.status(), Some(StatusCode::OK));
        assert_eq!(sink.body(), b"static body");
        let etag = sink.headers()[header::ETAG].clone();

        let sink = run(
            &mux,
            request(Method::GET, "/static")
                .header(header::IF_NONE_MATCH, etag)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(sink.status(), Some(StatusCode::NOT_MODIFIED));
        assert!(sink.body().is_empty());
        assert!(!sink.headers().contains_key(header::CONTENT_TYPE));
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_second_claim() {
        let mux = mux();
        let first = run(&mux, request(Method::GET, "/limited").body(Body::empty()).unwrap()).await;
        assert_eq!(first.status(), Some(StatusCode::NO_CONTENT));

        let second = run(&mux, request(Method::GET, "/limited").body(Body::empty()).unwrap()).await;
        assert_eq!(second.status(), Some(StatusCode::TOO_MANY_REQUESTS));
        assert!(second.headers().contains_key(header::RETRY_AFTER));
    }

    struct Recording(Arc<Mutex<Vec<ErrorType>>>);

    impl ErrorResponder for Recording {
        fn respond<'a, 'w: 'a>(
            &'a self,
            writer: Option<&'a mut ResponseWriter<'w>>,
            error: ResponseError,
        ) -> BoxFuture<'a, ()> {
            self.0.lock().push(error.error_type());
            let fallback: &'static DefaultResponder = &DefaultResponder;
            fallback.respond(writer, error)
        }
    }

    #[tokio::test]
    async fn test_custom_responder_sees_errors() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mux = mux().with_responder(Arc::new(Recording(Arc::clone(&seen))));
        run(&mux, request(Method::PUT, "/hello").body(Body::empty()).unwrap()).await;
        run(&mux, request(Method::GET, "/fail").body(Body::empty()).unwrap()).await;
        assert_eq!(*seen.lock(), vec![ErrorType::Client, ErrorType::Server]);
    }
}
