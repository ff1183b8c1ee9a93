//! End-to-end tests of the request pipeline over real TCP connections.

use axum::body::Bytes;
use axum::http::{HeaderValue, StatusCode};
use futures_util::stream;
use reqwest::header;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use routemux::config::MuxConfig;
use routemux::http::headers::parse_http_date;
use routemux::http::{Request, Response, StaticContent};
use routemux::routing::{handler_fn, EndpointSpecification, RouteTable};
use routemux::security::RateLimitPolicy;

mod common;

fn page() -> String {
    "<p>multiplexed</p>\n".repeat(64)
}

fn routes() -> RouteTable {
    let index = StaticContent::builder(page())
        .content_type(HeaderValue::from_static("text/html"))
        .gzip()
        .build()
        .unwrap();

    let mut table = RouteTable::new();
    table.add([
        EndpointSpecification::static_content("/", Arc::new(index)),
        EndpointSpecification::get(
            "/hello",
            handler_fn(|_| async { Ok(Response::text(StatusCode::OK, "hello, world")) }),
        ),
        EndpointSpecification::get(
            "/items",
            handler_fn(|_| async { Ok(Response::text(StatusCode::OK, "[]")) }),
        ),
        EndpointSpecification::post(
            "/items",
            handler_fn(|req: Request| async move {
                let item: Value = req.json()?;
                Response::json(StatusCode::CREATED, &item)
            }),
        ),
        EndpointSpecification::post(
            "/tiny",
            handler_fn(|_| async { Ok(Response::empty(StatusCode::NO_CONTENT)) }),
        )
        .with_max_body_size(2),
        EndpointSpecification::get(
            "/limited",
            handler_fn(|_| async { Ok(Response::text(StatusCode::OK, "ok")) }),
        )
        .with_rate_limit(RateLimitPolicy::new("integration", 2, Duration::from_secs(60))),
        EndpointSpecification::get(
            "/stream",
            handler_fn(|_| async {
                let chunks = stream::iter((1..=4).map(|n| {
                    Ok::<_, std::io::Error>(Bytes::from(format!("chunk-{n};")))
                }));
                Ok(Response::stream(
                    StatusCode::OK,
                    HeaderValue::from_static("text/plain"),
                    chunks,
                ))
            }),
        ),
    ]);
    table
}

async fn problem(response: reqwest::Response) -> Value {
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/problem+json"
    );
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_static_conditional_round_trip() {
    let server = common::start_server(MuxConfig::default(), routes()).await;
    let client = common::client();

    let first = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(first.status(), 200);
    let etag = first.headers()[header::ETAG].clone();
    assert_eq!(first.text().await.unwrap(), page());

    let second = client
        .get(server.url("/"))
        .header(header::IF_NONE_MATCH, etag)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 304);
    assert!(second.bytes().await.unwrap().is_empty());

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_static_encoding_negotiation() {
    let server = common::start_server(MuxConfig::default(), routes()).await;
    let client = common::client();

    let gzipped = client
        .get(server.url("/"))
        .header(header::ACCEPT_ENCODING, "gzip;q=1.0, identity;q=0")
        .send()
        .await
        .unwrap();
    assert_eq!(gzipped.status(), 200);
    assert_eq!(gzipped.headers()[header::CONTENT_ENCODING], "gzip");
    assert_eq!(gzipped.headers()[header::VARY], "Accept-Encoding");
    assert!(gzipped.bytes().await.unwrap().len() < page().len());

    let refused = client
        .get(server.url("/"))
        .header(header::ACCEPT_ENCODING, "*;q=0")
        .send()
        .await
        .unwrap();
    assert_eq!(refused.status(), 415);
    assert_eq!(refused.headers()[header::ACCEPT_ENCODING], "gzip, identity");

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_head_matches_get() {
    let server = common::start_server(MuxConfig::default(), routes()).await;
    let client = common::client();

    let get = client.get(server.url("/hello")).send().await.unwrap();
    let head = client.head(server.url("/hello")).send().await.unwrap();

    assert_eq!(get.status(), head.status());
    for name in [header::CONTENT_TYPE, header::CONTENT_LENGTH] {
        assert_eq!(get.headers()[&name], head.headers()[&name], "{name}");
    }
    assert!(head.bytes().await.unwrap().is_empty());
    assert_eq!(get.text().await.unwrap(), "hello, world");

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_options_and_method_not_allowed() {
    let server = common::start_server(MuxConfig::default(), routes()).await;
    let client = common::client();

    let options = client
        .request(Method::OPTIONS, server.url("/items"))
        .send()
        .await
        .unwrap();
    assert_eq!(options.status(), 204);
    assert_eq!(options.headers()[header::ALLOW], "GET, HEAD, OPTIONS, POST");

    let delete = client.delete(server.url("/items")).send().await.unwrap();
    assert_eq!(delete.status(), 405);
    assert_eq!(delete.headers()[header::ALLOW], "GET, HEAD, OPTIONS, POST");
    let body = problem(delete).await;
    assert!(body["detail"].as_str().unwrap().contains("DELETE"));

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_unknown_path_is_bare_404() {
    let server = common::start_server(MuxConfig::default(), routes()).await;

    let response = common::client()
        .get(server.url("/does-not-exist"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");

    let body = problem(response).await;
    assert_eq!(body["status"], 404);
    assert_eq!(body["title"], "Not Found");
    assert!(body.get("detail").is_none());

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_post_without_content_type() {
    let server = common::start_server(MuxConfig::default(), routes()).await;

    let response = common::client()
        .post(server.url("/items"))
        .body(r#"{"name":"widget"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 415);
    assert_eq!(response.headers()[header::ACCEPT], "application/json");
    problem(response).await;

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_post_json_round_trip() {
    let server = common::start_server(MuxConfig::default(), routes()).await;

    let response = common::client()
        .post(server.url("/items"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(r#"{"name":"widget"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["name"], "widget");

    let malformed = common::client()
        .post(server.url("/items"))
        .header(header::CONTENT_TYPE, "application/json")
        .body("{")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), 400);

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_body_over_ceiling() {
    let server = common::start_server(MuxConfig::default(), routes()).await;

    let response = common::client()
        .post(server.url("/tiny"))
        .header(header::CONTENT_TYPE, "application/json")
        .body("[1,2,3]")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 413);
    let body = problem(response).await;
    assert!(body["detail"].as_str().unwrap().contains("Limit: 2 bytes"));

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_rate_limit_retry_after() {
    let server = common::start_server(MuxConfig::default(), routes()).await;
    let client = common::client();

    for _ in 0..2 {
        let ok = client.get(server.url("/limited")).send().await.unwrap();
        assert_eq!(ok.status(), 200);
    }

    let limited = client.get(server.url("/limited")).send().await.unwrap();
    assert_eq!(limited.status(), 429);
    let retry_after = limited.headers()[header::RETRY_AFTER].to_str().unwrap().to_string();
    let retry_at = parse_http_date(&retry_after).unwrap();
    assert!(retry_at.timestamp() > chrono::Utc::now().timestamp());
    problem(limited).await;

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_chunked_streaming() {
    let server = common::start_server(MuxConfig::default(), routes()).await;

    let response = common::client()
        .get(server.url("/stream"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()[header::TRANSFER_ENCODING], "chunked");
    assert_eq!(
        response.text().await.unwrap(),
        "chunk-1;chunk-2;chunk-3;chunk-4;"
    );

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_graceful_shutdown() {
    let server = common::start_server(MuxConfig::default(), routes()).await;
    let response = common::client().get(server.url("/hello")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    server.shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
}
