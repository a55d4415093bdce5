//! Loopback backends for integration tests.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// A backend that answers every request with a plain-text description of
/// what it received:
///
/// ```text
/// <tag> <METHOD> <path?query>
/// host=<Host header>
/// xff=<X-Forwarded-For header>
/// connection=<Connection header>
///
/// <body>
/// ```
///
/// Returns its address and a counter of accepted connections.
#[allow(dead_code)]
pub async fn start_echo_backend(tag: &'static str) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let svc = service_fn(move |req| echo(tag, req));
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(socket), svc)
                    .await;
            });
        }
    });

    (addr, accepted)
}

async fn echo(
    tag: &'static str,
    req: hyper::Request<Incoming>,
) -> Result<hyper::Response<Full<Bytes>>, Infallible> {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_owned()
    };
    let head = format!(
        "{tag} {} {}\nhost={}\nxff={}\nconnection={}\n\n",
        req.method(),
        req.uri().path_and_query().map_or("/", |pq| pq.as_str()),
        header("host"),
        header("x-forwarded-for"),
        header("connection"),
    );
    let body = req.into_body().collect().await.map(|c| c.to_bytes()).unwrap_or_default();

    let mut out = head.into_bytes();
    out.extend_from_slice(&body);
    Ok(hyper::Response::new(Full::new(Bytes::from(out))))
}

/// A backend that accepts connections and never answers.
#[allow(dead_code)]
pub async fn start_silent_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    addr
}

/// A loopback port nothing listens on.
#[allow(dead_code)]
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// A listener whose accept queue is full and never drained. Further connects
/// get no SYN-ACK, so dials to it hang until their timeout.
#[allow(dead_code)]
pub struct FullBacklog {
    pub addr: SocketAddr,
    _listener: TcpListener,
    _held: Vec<TcpStream>,
}

#[allow(dead_code)]
pub async fn start_full_backlog() -> FullBacklog {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(1).unwrap();
    let addr = listener.local_addr().unwrap();

    let mut held = Vec::new();
    for _ in 0..64 {
        match tokio::time::timeout(Duration::from_millis(200), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => held.push(stream),
            Ok(Err(e)) => panic!("filling backlog: {e}"),
            // the queue is full: this SYN went unanswered
            Err(_) => return FullBacklog { addr, _listener: listener, _held: held },
        }
    }
    panic!("accept queue never filled after {} connections", held.len());
}
