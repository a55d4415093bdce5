//! The terminal filter of a proxy pipeline: forward to a backend.

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use tracing::{debug, warn};

use super::{BoxFuture, RequestFilter};
use crate::request::{Request, Response, StageStatus};
use crate::responder;
use crate::upstream::UpstreamTransport;

/// Forwards every request it sees to one [`UpstreamTransport`] and answers
/// with whatever the backend returns.
///
/// A backend that cannot be reached or does not answer in time never
/// surfaces as an error: the stage is marked [`StageStatus::Fail`] and the
/// client gets `504 Gateway Timeout` for timeouts, `502 Bad Gateway` for
/// everything else.
///
/// Usually installed as a pipeline fallback or as a router target.
#[derive(Clone)]
pub struct UpstreamFilter {
    transport: Arc<UpstreamTransport>,
}

impl UpstreamFilter {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self::with_transport(Arc::new(UpstreamTransport::new(host, port, timeout)))
    }

    /// Shares an existing transport, and with it the connection pool and
    /// address cache.
    pub fn with_transport(transport: Arc<UpstreamTransport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<UpstreamTransport> { &self.transport }
}

impl RequestFilter for UpstreamFilter {
    fn filter_request<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Option<Response>> {
        Box::pin(async move {
            match self.transport.forward(req).await {
                Ok(res) => {
                    debug!(
                        request_id = %req.id(),
                        upstream = self.transport.authority(),
                        status = res.status().as_u16(),
                        "upstream answered",
                    );
                    Some(res)
                }
                Err(e) => {
                    warn!(
                        request_id = %req.id(),
                        upstream = self.transport.authority(),
                        error = %e,
                        "upstream failed",
                    );
                    req.set_status(StageStatus::Fail);
                    let status = if e.is_timeout() {
                        StatusCode::GATEWAY_TIMEOUT
                    } else {
                        StatusCode::BAD_GATEWAY
                    };
                    Some(responder::text(status, status.canonical_reason().unwrap_or_default()))
                }
            }
        })
    }

    fn name(&self) -> &str { "upstream" }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use tokio::net::TcpListener;

    use super::*;
    use crate::body::Body;

    #[tokio::test]
    async fn refused_upstream_becomes_bad_gateway() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let filter = UpstreamFilter::new("127.0.0.1", port, Duration::from_secs(2));
        let mut req = Request::new(http::Request::get("/x").body(Body::empty()).unwrap());
        req.start_stage(filter.name());

        let res = filter.filter_request(&mut req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(req.stage().status, StageStatus::Fail);
        assert_eq!(res.into_body().collect().await.unwrap().to_bytes(), "Bad Gateway");
    }

    #[tokio::test]
    async fn silent_upstream_becomes_gateway_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _held = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let filter = UpstreamFilter::new("127.0.0.1", port, Duration::from_millis(200));
        let mut req = Request::new(http::Request::get("/slow").body(Body::empty()).unwrap());

        let res = filter.filter_request(&mut req).await.unwrap();
        assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
