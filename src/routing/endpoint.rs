//! Endpoint specifications and handlers.

use axum::http::Method;
use futures_util::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::http::content::StaticContent;
use crate::http::problem::ResponseError;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::security::rate_limit::RateLimitPolicy;

/// Future returned by a [`Handler`].
pub type HandlerFuture = BoxFuture<'static, Result<Response, ResponseError>>;

/// Produces the response for a validated request.
pub trait Handler: Send + Sync {
    fn call(&self, request: Request) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, ResponseError>> + Send + 'static,
{
    fn call(&self, request: Request) -> HandlerFuture {
        Box::pin(self(request))
    }
}

/// Wrap an async function or closure as a shared handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, ResponseError>> + Send + 'static,
{
    Arc::new(f)
}

/// What an endpoint serves.
#[derive(Clone)]
pub enum Action {
    /// A precomputed payload, negotiated per request.
    Static(Arc<StaticContent>),
    Handler(Arc<dyn Handler>),
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(content) => f
                .debug_tuple("Static")
                .field(&content.etag())
                .finish(),
            Self::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

/// One (path, method) registration. Immutable once added to a route table.
#[derive(Debug, Clone)]
pub struct EndpointSpecification {
    pub path: String,
    pub method: Method,
    /// Expected request `type/subtype`, overriding the multiplexer default.
    pub content_type: Option<String>,
    pub rate_limit: Option<RateLimitPolicy>,
    /// Body ceiling in bytes, overriding the multiplexer default.
    pub max_body_size: Option<usize>,
    pub action: Action,
}

impl EndpointSpecification {
    pub fn new(method: Method, path: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self {
            path: path.into(),
            method,
            content_type: None,
            rate_limit: None,
            max_body_size: None,
            action: Action::Handler(handler),
        }
    }

    pub fn get(path: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self::new(Method::GET, path, handler)
    }

    pub fn post(path: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self::new(Method::POST, path, handler)
    }

    pub fn put(path: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self::new(Method::PUT, path, handler)
    }

    pub fn patch(path: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self::new(Method::PATCH, path, handler)
    }

    pub fn delete(path: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self::new(Method::DELETE, path, handler)
    }

    /// A GET endpoint serving a static payload.
    pub fn static_content(path: impl Into<String>, content: Arc<StaticContent>) -> Self {
        Self {
            path: path.into(),
            method: Method::GET,
            content_type: None,
            rate_limit: None,
            max_body_size: None,
            action: Action::Static(content),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limit = Some(policy);
        self
    }

    pub fn with_max_body_size(mut self, max: usize) -> Self {
        self.max_body_size = Some(max);
        self
    }
}
