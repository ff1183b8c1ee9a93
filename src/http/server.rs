//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router that hands every request to the multiplexer
//! - Wire up middleware (request ID, tracing, timeout, concurrency limit)
//! - Bind server to listener
//! - Stop gracefully on OS signals or the shutdown coordinator
//!
//! # Design Decisions
//! - Routing happens in the multiplexer, so axum only has a fallback
//! - Each request is dispatched on its own task writing into a
//!   `HyperSink`; the handler returns as soon as the head is committed,
//!   which lets streaming bodies flow while the dispatcher is still running
//! - The concurrency permit and the request timeout therefore cover a
//!   request only until its head is committed; a streamed body or a
//!   dispatch task outliving the timeout is not bounded by either layer

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::MuxConfig;
use crate::http::dispatch::Mux;
use crate::http::sink::HyperSink;
use crate::lifecycle::shutdown_signal;

/// HTTP server for the multiplexer.
pub struct HttpServer {
    router: Router,
    config: MuxConfig,
}

impl HttpServer {
    /// Create a new HTTP server serving `mux`.
    pub fn new(config: MuxConfig, mux: Mux) -> Self {
        let router = Self::build_router(&config, Arc::new(mux));
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &MuxConfig, mux: Arc<Mux>) -> Router {
        Router::new()
            .fallback(mux_handler)
            .with_state(mux)
            .layer(GlobalConcurrencyLimitLayer::new(
                config.listener.max_concurrent_requests,
            ))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The fully layered router, e.g. for driving with `tower::ServiceExt`.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener until
    /// an OS signal arrives or `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            max_concurrent_requests = self.config.listener.max_concurrent_requests,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &MuxConfig {
        &self.config
    }
}

/// Hand the request to the multiplexer and wait for the response head.
async fn mux_handler(State(mux): State<Arc<Mux>>, request: Request<Body>) -> Response {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));

    let (mut sink, pending) = HyperSink::new();
    tokio::spawn(async move {
        mux.dispatch(request, remote, &mut sink).await;
        sink.finish();
    });

    pending.into_response().await
}
