//! Dialing and connection reuse for a single upstream `host:port`.
//!
//! ```text
//! UpstreamTransport ── hyper_util legacy Client (idle pool, ≤ max_idle_per_host)
//!        │                         │ needs a connection
//!        │                         ▼
//!        └──────────────── UpstreamConnector ──▶ Dialer::dial()
//!                                                   ├─ resolve (cached for dns_cache_duration)
//!                                                   ├─ TcpStream::connect, bounded by timeout
//!                                                   └─ DeadlineStream: reads/writes fail after now + timeout
//! ```
//!
//! The connector ignores the URI it is asked for and always dials the
//! configured endpoint. Nothing here retries: every failure is handed back to
//! the caller as a [`DialError`] or [`ProxyError`].

use std::future::Future;
use std::io;
use std::net::{Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::uri::{Authority, Scheme};
use http::Uri;
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::Sleep;
use tracing::{debug, trace};

use crate::body::Body;
use crate::error::{DialError, ProxyError};
use crate::request::{Request, Response};

pub const DEFAULT_MAX_IDLE_PER_HOST: usize = 15;
pub const DEFAULT_DNS_CACHE_DURATION: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Headers that describe one hop and must not be forwarded.
const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Drops the fixed hop-by-hop headers and every header the `Connection`
/// header names.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

// ── Dialer ────────────────────────────────────────────────────────────────────

struct CachedAddr {
    addr: SocketAddr,
    resolved_at: Instant,
}

struct Dialer {
    host: String,
    port: u16,
    authority: String,
    timeout: Duration,
    dns_cache_duration: Duration,
    cache: Mutex<Option<CachedAddr>>,
}

impl Dialer {
    fn cached(&self) -> Option<SocketAddr> {
        self.cache
            .lock()
            .as_ref()
            .filter(|c| c.resolved_at.elapsed() < self.dns_cache_duration)
            .map(|c| c.addr)
    }

    async fn resolve(&self) -> Result<SocketAddr, DialError> {
        if let Some(addr) = self.cached() {
            return Ok(addr);
        }

        let resolve_err = |source| DialError::Resolve { host: self.host.clone(), source };
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(resolve_err)?
            .collect();
        // IPv4 first, like a tcp4 dial; IPv6 only when it is all there is.
        let addr = addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| resolve_err(io::Error::new(io::ErrorKind::NotFound, "no addresses")))?;

        *self.cache.lock() = Some(CachedAddr { addr, resolved_at: Instant::now() });
        debug!(host = %self.host, %addr, "resolved upstream");
        Ok(addr)
    }

    async fn dial(&self) -> Result<DeadlineStream, DialError> {
        let connect = async {
            let addr = self.resolve().await?;
            TcpStream::connect(addr).await.map_err(|source| {
                // a stale address should not outlive a failed connect
                self.cache.lock().take();
                match source.kind() {
                    io::ErrorKind::ConnectionRefused => DialError::Refused { addr, source },
                    _ => DialError::Io { addr, source },
                }
            })
        };

        let stream = tokio::time::timeout(self.timeout, connect)
            .await
            .map_err(|_| DialError::Timeout {
                addr: self.authority.clone(),
                timeout: self.timeout,
            })??;
        if let Err(e) = stream.set_nodelay(true) {
            trace!(host = %self.host, error = %e, "set_nodelay failed");
        }

        trace!(host = %self.host, port = self.port, "upstream connected");
        Ok(DeadlineStream::new(stream, Instant::now() + self.timeout))
    }
}

// ── DeadlineStream ────────────────────────────────────────────────────────────

/// A TCP connection with a hard deadline.
///
/// Once the deadline passes every read and write fails with
/// [`io::ErrorKind::TimedOut`], so a stalled upstream cannot hold the
/// connection past its window. Pending operations are woken at the deadline.
pub struct DeadlineStream {
    stream: TcpStream,
    deadline: Pin<Box<Sleep>>,
}

impl DeadlineStream {
    fn new(stream: TcpStream, deadline: Instant) -> Self {
        Self {
            stream,
            deadline: Box::pin(tokio::time::sleep_until(deadline.into())),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline.deadline().into_std()
    }

    pub fn get_ref(&self) -> &TcpStream { &self.stream }

    fn check_deadline(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
        if self.deadline.as_mut().poll(cx).is_ready() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "upstream deadline exceeded"));
        }
        Ok(())
    }
}

impl AsyncRead for DeadlineStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(e) = this.check_deadline(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for DeadlineStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Err(e) = this.check_deadline(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(e) = this.check_deadline(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

/// What the pooled client reads from and writes to: a [`DeadlineStream`]
/// seen through hyper's IO traits.
pub struct UpstreamIo {
    inner: TokioIo<DeadlineStream>,
}

impl UpstreamIo {
    pub fn get_ref(&self) -> &DeadlineStream { self.inner.inner() }
}

impl hyper::rt::Read for UpstreamIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        hyper::rt::Read::poll_read(Pin::new(&mut self.inner), cx, buf)
    }
}

impl hyper::rt::Write for UpstreamIo {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        hyper::rt::Write::poll_write(Pin::new(&mut self.inner), cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        hyper::rt::Write::poll_flush(Pin::new(&mut self.inner), cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        hyper::rt::Write::poll_shutdown(Pin::new(&mut self.inner), cx)
    }
}

impl Connection for UpstreamIo {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

// ── UpstreamConnector ─────────────────────────────────────────────────────────

/// The connector handed to the pooled client. Cheap to clone; all clones
/// share one address cache.
#[derive(Clone)]
pub struct UpstreamConnector {
    dialer: Arc<Dialer>,
}

impl tower::Service<Uri> for UpstreamConnector {
    type Response = UpstreamIo;
    type Error = DialError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _dst: Uri) -> Self::Future {
        let dialer = Arc::clone(&self.dialer);
        Box::pin(async move { dialer.dial().await.map(|stream| UpstreamIo { inner: TokioIo::new(stream) }) })
    }
}

// ── UpstreamTransport ─────────────────────────────────────────────────────────

/// Everything needed to reach one backend: where it is, how long to wait for
/// it, and a pool of reusable connections to it.
///
/// Build once per backend and share it across every request for the life of
/// the process.
pub struct UpstreamTransport {
    dialer: Arc<Dialer>,
    client: Client<UpstreamConnector, Body>,
}

impl UpstreamTransport {
    /// A transport with default pooling and address caching.
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self::builder(host, port).timeout(timeout).build()
    }

    pub fn builder(host: impl Into<String>, port: u16) -> UpstreamTransportBuilder {
        UpstreamTransportBuilder {
            host: host.into(),
            port,
            timeout: DEFAULT_TIMEOUT,
            max_idle_per_host: DEFAULT_MAX_IDLE_PER_HOST,
            dns_cache_duration: DEFAULT_DNS_CACHE_DURATION,
            pool_idle_timeout: None,
        }
    }

    pub fn host(&self) -> &str { &self.dialer.host }
    pub fn port(&self) -> u16 { self.dialer.port }
    pub fn timeout(&self) -> Duration { self.dialer.timeout }

    /// `host:port`, with IPv6 literals in brackets.
    pub fn authority(&self) -> &str { &self.dialer.authority }

    /// The address currently cached for the host, if still valid.
    pub fn cached_addr(&self) -> Option<SocketAddr> { self.dialer.cached() }

    /// Opens a fresh connection, bypassing the pool.
    pub async fn dial(&self) -> Result<DeadlineStream, DialError> {
        self.dialer.dial().await
    }

    /// Sends a request over a pooled connection. The request URI should
    /// already point at this upstream; see [`forward`](Self::forward).
    pub async fn send(&self, req: http::Request<Body>) -> Result<http::Response<Incoming>, ProxyError> {
        self.client.request(req).await.map_err(|source| ProxyError::Upstream {
            upstream: self.authority().to_owned(),
            source,
        })
    }

    /// Proxies `req` to this upstream and wraps the answer as a pipeline response.
    ///
    /// The path and query are kept, the authority is replaced, the original
    /// `Host` header is preserved and hop-by-hop headers are dropped. A
    /// buffered body is copied rather than consumed so the pooled buffer is
    /// still on the request for response filters.
    pub async fn forward(&self, req: &mut Request) -> Result<Response, ProxyError> {
        let outgoing = self.outgoing(req)?;
        let res = self.send(outgoing).await?;
        Ok(res.map(Body::Incoming))
    }

    fn outgoing(&self, req: &mut Request) -> Result<http::Request<Body>, ProxyError> {
        let path = req.uri().path_and_query().map_or("/", |pq| pq.as_str());
        let uri = Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(self.authority().parse::<Authority>().map_err(http::Error::from)?)
            .path_and_query(path)
            .build()?;

        let mut headers = req.headers().clone();
        strip_hop_by_hop(&mut headers);
        if !headers.contains_key(header::HOST) {
            headers.insert(header::HOST, self.authority().parse::<HeaderValue>().map_err(http::Error::from)?);
        }
        if let Some(peer) = req.remote_addr() {
            let forwarded = peer.ip().to_string().parse::<HeaderValue>().map_err(http::Error::from)?;
            headers.append("x-forwarded-for", forwarded);
        }

        let method = req.method().clone();
        let body = req.body_mut().for_forwarding();
        let mut outgoing = http::Request::builder().method(method).uri(uri).body(body)?;
        *outgoing.headers_mut() = headers;
        Ok(outgoing)
    }
}

/// Builder for [`UpstreamTransport`].
pub struct UpstreamTransportBuilder {
    host: String,
    port: u16,
    timeout: Duration,
    max_idle_per_host: usize,
    dns_cache_duration: Duration,
    pool_idle_timeout: Option<Duration>,
}

impl UpstreamTransportBuilder {
    /// Bounds the dial and sets each connection's deadline. Default 10 s.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cap on idle pooled connections to the upstream. Default 15.
    pub fn max_idle_per_host(mut self, max: usize) -> Self {
        self.max_idle_per_host = max;
        self
    }

    /// How long a resolved address is reused. Default 15 minutes; zero
    /// resolves on every dial.
    pub fn dns_cache_duration(mut self, duration: Duration) -> Self {
        self.dns_cache_duration = duration;
        self
    }

    /// How long an idle pooled connection is kept. Defaults to the timeout,
    /// since a connection is useless past its deadline anyway.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> UpstreamTransport {
        let authority = match self.host.parse::<Ipv6Addr>() {
            Ok(_) => format!("[{}]:{}", self.host, self.port),
            Err(_) => format!("{}:{}", self.host, self.port),
        };
        let dialer = Arc::new(Dialer {
            host: self.host,
            port: self.port,
            authority,
            timeout: self.timeout,
            dns_cache_duration: self.dns_cache_duration,
            cache: Mutex::new(None),
        });

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(self.pool_idle_timeout.unwrap_or(self.timeout))
            .pool_max_idle_per_host(self.max_idle_per_host)
            .pool_timer(TokioTimer::new())
            .build(UpstreamConnector { dialer: Arc::clone(&dialer) });

        UpstreamTransport { dialer, client }
    }
}
