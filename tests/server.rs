mod common;

use std::time::Duration;

use edgeline::filter::{request_filter_fn, StringBodyFilter, UpstreamFilter};
use edgeline::{responder, Pipeline, StatusCode};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use common::start_echo_backend;

async fn roundtrip(addr: std::net::SocketAddr, raw: &str) -> String {
    let mut conn = TcpStream::connect(addr).await.unwrap();
    conn.write_all(raw.as_bytes()).await.unwrap();
    let mut out = String::new();
    conn.read_to_string(&mut out).await.unwrap();
    out
}

#[tokio::test]
async fn serves_a_proxy_pipeline_end_to_end() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let (backend, _) = start_echo_backend("backend").await;
    let body = Arc::new(StringBodyFilter::new());
    let pipeline = Pipeline::builder()
        .filter_arc(body.clone())
        .filter(request_filter_fn(|req| {
            (req.uri().path() == "/healthz").then(|| responder::text(StatusCode::OK, "ok"))
        }))
        .fallback(UpstreamFilter::new(
            backend.ip().to_string(),
            backend.port(),
            Duration::from_secs(2),
        ))
        .response_filter_arc(body)
        .build();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(edgeline::server::serve_with_shutdown(listener, pipeline, async {
        let _ = stopped.await;
    }));

    let health = roundtrip(addr, "GET /healthz HTTP/1.1\r\nHost: edge\r\nConnection: close\r\n\r\n").await;
    assert!(health.starts_with("HTTP/1.1 200 OK"), "{health}");
    assert!(health.ends_with("ok"), "{health}");

    let proxied = roundtrip(
        addr,
        "PUT /items/7 HTTP/1.1\r\nHost: edge\r\nContent-Length: 4\r\nConnection: close\r\n\r\nabcd",
    )
    .await;
    assert!(proxied.starts_with("HTTP/1.1 200 OK"), "{proxied}");
    assert!(proxied.contains("backend PUT /items/7\n"), "{proxied}");
    assert!(proxied.contains("host=edge\n"), "{proxied}");
    assert!(proxied.contains("xff=127.0.0.1\n"), "{proxied}");
    assert!(proxied.ends_with("\n\nabcd"), "{proxied}");

    stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn unrouted_request_is_not_found() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(edgeline::server::serve_with_shutdown(
        listener,
        Pipeline::builder().build(),
        async {
            let _ = stopped.await;
        },
    ));

    let res = roundtrip(addr, "GET /nothing HTTP/1.1\r\nHost: edge\r\nConnection: close\r\n\r\n").await;
    assert!(res.starts_with("HTTP/1.1 404 Not Found"), "{res}");

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}
