//! HTTP front end and graceful shutdown.
//!
//! Each accepted connection is served by hyper (HTTP/1.1 or HTTP/2, whatever
//! the client speaks). Every request on it becomes a [`Request`] that runs
//! through one shared [`Pipeline`].
//!
//! # Shutdown
//!
//! On SIGTERM or Ctrl-C the server:
//! 1. stops calling `listener.accept()`, so no new connections are made;
//! 2. lets every in-flight connection task run to completion;
//! 3. returns from [`Server::serve`].
//!
//! Under Kubernetes, set `terminationGracePeriodSeconds` longer than the
//! slowest upstream timeout.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::pipeline::Pipeline;
use crate::request::{Request, Response};

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust,no_run
    /// use edgeline::Server;
    /// let server = Server::bind(([0, 0, 0, 0], 8080).into());
    /// ```
    pub fn bind(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Accepts connections and runs each request through `pipeline` until a
    /// shutdown signal arrives and in-flight connections drain.
    pub async fn serve(self, pipeline: Pipeline) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        serve_with_shutdown(listener, pipeline, shutdown_signal()).await
    }
}

/// Serves on an already-bound listener until `signal` resolves.
///
/// [`Server::serve`] wires this to SIGTERM / Ctrl-C; pass any future to
/// stop on something else.
pub async fn serve_with_shutdown<S>(
    listener: TcpListener,
    pipeline: Pipeline,
    signal: S,
) -> Result<(), Error>
where
    S: Future<Output = ()>,
{
    let pipeline = Arc::new(pipeline);
    info!(addr = %listener.local_addr()?, "edgeline listening");

    let mut tasks = tokio::task::JoinSet::new();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            // shutdown first: a signal stops accepting even with a backlog
            biased;

            () = &mut signal => {
                info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let pipeline = Arc::clone(&pipeline);
                let io = TokioIo::new(stream);

                tasks.spawn(async move {
                    let svc = service_fn(move |req| {
                        let pipeline = Arc::clone(&pipeline);
                        async move { dispatch(pipeline, req, remote_addr).await }
                    });

                    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                        .serve_connection(io, svc)
                        .await
                    {
                        error!(peer = %remote_addr, "connection error: {e}");
                    }
                });
            }

            // reap finished connections so the set stays small
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    while tasks.join_next().await.is_some() {}

    info!("edgeline stopped");
    Ok(())
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// One request in, one response out. The pipeline always answers, so hyper
/// never sees an error.
async fn dispatch(
    pipeline: Arc<Pipeline>,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<Response, Infallible> {
    let mut req = Request::new(req).with_remote_addr(remote_addr);
    let res = pipeline.run(&mut req).await;

    debug!(
        request_id = %req.id(),
        method = %req.method(),
        path = req.uri().path(),
        status = res.status().as_u16(),
        elapsed_ms = req.elapsed().as_millis() as u64,
        "request served"
    );
    Ok(res)
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or Ctrl-C. A handler that cannot be
/// installed is logged and that signal is never waited on.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
