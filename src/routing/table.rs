//! Route lookup.
//!
//! # Responsibilities
//! - Store endpoint specifications by path, then upper-cased method
//! - Resolve a request to an endpoint, a synthesised OPTIONS answer, or an
//!   explicit 404/405
//!
//! # Design Decisions
//! - Mutation takes `&mut self`; the table is frozen behind an `Arc` once
//!   serving starts
//! - Exact path matching via HashMap, no patterns
//! - HEAD reuses the GET registration

use axum::http::{header, HeaderValue, Method, StatusCode};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::http::problem::{ProblemDetail, ResponseError};
use crate::http::response::Response;
use crate::routing::endpoint::EndpointSpecification;

/// Why a request matched no endpoint.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("no endpoint registered for path `{0}`")]
    UnknownPath(String),

    #[error("method {method} not allowed for `{path}` (allowed: {allowed})")]
    MethodNotAllowed {
        path: String,
        method: String,
        allowed: String,
    },
}

/// Result of a successful lookup.
#[derive(Debug)]
pub enum Resolution {
    Endpoint(Arc<EndpointSpecification>),
    /// Synthesised answer to an OPTIONS request.
    Options(Response),
}

/// Path → method → endpoint table.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<String, BTreeMap<String, Arc<EndpointSpecification>>>,
}

fn method_key(method: &Method) -> String {
    method.as_str().to_ascii_uppercase()
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert endpoints, replacing any existing registration for the same
    /// path and method.
    pub fn add(&mut self, specs: impl IntoIterator<Item = EndpointSpecification>) {
        for spec in specs {
            let key = method_key(&spec.method);
            let previous = self
                .routes
                .entry(spec.path.clone())
                .or_default()
                .insert(key, Arc::new(spec));
            if let Some(previous) = previous {
                tracing::debug!(
                    path = %previous.path,
                    method = %previous.method,
                    "Replaced endpoint registration"
                );
            }
        }
    }

    /// Remove the registrations matching each spec's path and method.
    pub fn delete<'a>(&mut self, specs: impl IntoIterator<Item = &'a EndpointSpecification>) {
        for spec in specs {
            self.remove(&spec.path, &spec.method);
        }
    }

    pub fn remove(&mut self, path: &str, method: &Method) -> Option<Arc<EndpointSpecification>> {
        let methods = self.routes.get_mut(path)?;
        let removed = methods.remove(&method_key(method));
        if methods.is_empty() {
            self.routes.remove(path);
        }
        removed
    }

    /// Number of registered (path, method) pairs.
    pub fn len(&self) -> usize {
        self.routes.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolve a request line to an endpoint.
    pub fn resolve(&self, path: &str, method: &Method) -> Result<Resolution, ResponseError> {
        let Some(methods) = self.routes.get(path) else {
            return Err(ResponseError::client(
                ProblemDetail::new(StatusCode::NOT_FOUND),
                RoutingError::UnknownPath(path.to_string()),
            ));
        };

        let key = method_key(method);
        if let Some(spec) = methods.get(&key) {
            return Ok(Resolution::Endpoint(Arc::clone(spec)));
        }
        if *method == Method::HEAD {
            if let Some(spec) = methods.get(Method::GET.as_str()) {
                return Ok(Resolution::Endpoint(Arc::clone(spec)));
            }
        }

        let mut allowed: BTreeSet<&str> = methods.keys().map(String::as_str).collect();
        allowed.insert(Method::OPTIONS.as_str());
        if allowed.contains(Method::GET.as_str()) {
            allowed.insert(Method::HEAD.as_str());
        }
        let allowed = allowed.into_iter().collect::<Vec<_>>().join(", ");
        let allow = HeaderValue::from_str(&allowed).map_err(ResponseError::server)?;

        if *method == Method::OPTIONS {
            return Ok(Resolution::Options(
                Response::empty(StatusCode::NO_CONTENT).with_header(header::ALLOW, allow),
            ));
        }

        Err(ResponseError::client(
            ProblemDetail::new(StatusCode::METHOD_NOT_ALLOWED)
                .with_detail(format!("expected one of {allowed}, got {key}")),
            RoutingError::MethodNotAllowed {
                path: path.to_string(),
                method: key,
                allowed,
            },
        )
        .with_header(header::ALLOW, allow))
    }
}
