//! routemux demo server
//!
//! Serves a handful of endpoints through the multiplexer:
//!
//! ```text
//! GET  /         static HTML page (ETag, Last-Modified, gzip variant)
//! GET  /health   JSON status
//! POST /echo     echoes a JSON body back (rate limited when enabled)
//! GET  /stream   chunked ticker (rate limited when enabled)
//! ```

use axum::body::Bytes;
use axum::http::{HeaderValue, StatusCode};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::TcpListener;

use routemux::config::{self, MuxConfig};
use routemux::http::{Request, Response, ResponseError, StaticContent};
use routemux::observability::{logging, metrics};
use routemux::routing::{handler_fn, EndpointSpecification, RouteTable};
use routemux::security::RateLimitPolicy;
use routemux::{HttpServer, Mux, MuxOptions, Shutdown};

const INDEX_HTML: &str = r#"<!doctype html>
<html>
  <head><title>routemux</title></head>
  <body>
    <h1>routemux</h1>
    <p>Try <code>/health</code>, <code>POST /echo</code> or <code>/stream</code>.</p>
  </body>
</html>
"#;

#[derive(Parser)]
#[command(name = "routemux")]
#[command(about = "HTTP request multiplexer demo server", long_about = None)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

fn routes(config: &MuxConfig) -> Result<RouteTable, Box<dyn std::error::Error>> {
    let index = StaticContent::builder(INDEX_HTML)
        .content_type(HeaderValue::from_static("text/html; charset=utf-8"))
        .last_modified(SystemTime::now())
        .gzip()
        .build()?;

    let mut echo = EndpointSpecification::post(
        "/echo",
        handler_fn(|req: Request| async move {
            let value: serde_json::Value = req.json()?;
            Response::json(StatusCode::OK, &value)
        }),
    );
    let mut ticker = EndpointSpecification::get(
        "/stream",
        handler_fn(|_| async {
            let ticks = futures_util::stream::unfold(0u32, |n| async move {
                if n == 5 {
                    return None;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
                Some((Ok::<_, ResponseError>(Bytes::from(format!("tick {n}\n"))), n + 1))
            });
            Ok(Response::stream(
                StatusCode::OK,
                HeaderValue::from_static("text/plain; charset=utf-8"),
                ticks,
            ))
        }),
    );

    if config.rate_limit.enabled {
        let policy = RateLimitPolicy::from_config("default", &config.rate_limit);
        echo = echo.with_rate_limit(policy.clone());
        ticker = ticker.with_rate_limit(policy);
    }

    let mut table = RouteTable::new();
    table.add([
        EndpointSpecification::static_content("/", Arc::new(index)),
        EndpointSpecification::get(
            "/health",
            handler_fn(|_| async {
                Response::json(StatusCode::OK, &serde_json::json!({ "status": "ok" }))
            }),
        ),
        echo,
        ticker,
    ]);
    Ok(table)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => MuxConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
        config::validate_config(&config).map_err(config::ConfigError::Validation)?;
    }

    logging::init_logging(&config.observability)?;
    tracing::info!("routemux v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_concurrent_requests = config.listener.max_concurrent_requests,
        request_timeout_secs = config.timeouts.request_secs,
        rate_limit_enabled = config.rate_limit.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let mux = Mux::new(routes(&config)?, MuxOptions::from_config(&config));
    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, mux);
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
