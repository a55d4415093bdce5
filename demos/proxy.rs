//! A small reverse proxy built from the crate's parts.
//!
//! Run with:
//!   RUST_LOG=edgeline=debug cargo run --example proxy -- proxy.toml
//!
//! proxy.toml:
//!
//!   [server]
//!   bind_address = "127.0.0.1:8080"
//!
//!   [upstream]
//!   host = "127.0.0.1"
//!   port = 3000
//!
//! Try:
//!   curl http://localhost:8080/healthz
//!   curl -H 'Host: echo.local' -d 'hello' http://localhost:8080/anything
//!   curl http://localhost:8080/whatever     # proxied to [upstream]

use std::collections::BTreeMap;
use std::sync::Arc;

use edgeline::filter::{request_filter_fn, StringBodyFilter, UpstreamFilter};
use edgeline::router::HostRouter;
use edgeline::{responder, Config, Pipeline, Server, StatusCode};
use http::HeaderMap;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), edgeline::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let pool = Arc::new(config.buffer_pool.build());
    let body = Arc::new(StringBodyFilter::with_pool(pool, config.buffer_pool.max_body_size));

    // echoes the buffered body back as JSON
    let echo = request_filter_fn(|req| {
        let len = req.body_mut().buffered().map_or(0, |entry| entry.len());
        let summary = BTreeMap::from([
            ("method", req.method().to_string()),
            ("url", req.effective_url()),
            ("body_bytes", len.to_string()),
        ]);
        responder::json(StatusCode::OK, HeaderMap::new(), &summary).ok()
    });

    let mut builder = Pipeline::builder()
        .filter_arc(body.clone())
        .filter(request_filter_fn(|req| {
            (req.uri().path() == "/healthz").then(|| responder::text(StatusCode::OK, "ok"))
        }))
        .router(HostRouter::new().host("echo.local", echo))
        .response_filter_arc(body);

    if let Some(upstream) = &config.upstream {
        builder = builder.fallback(UpstreamFilter::with_transport(Arc::new(upstream.build_transport())));
    }

    Server::bind(config.server.addr()?).serve(builder.build()).await
}
