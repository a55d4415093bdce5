//! # edgeline
//!
//! Building blocks for HTTP reverse proxies: a two-phase filter pipeline,
//! routers that pick sub-pipelines, a pool of reusable request-body buffers
//! and an upstream transport with cached dialing and connection reuse.
//!
//! ## The model
//!
//! A [`Pipeline`] runs request filters in order until one answers, falls back
//! to a default action (usually proxying upstream), then runs every response
//! filter on the way out. Filters talk to each other through the [`Request`]
//! context: each runs in its own named stage and leaves a [`StageStatus`]
//! that later filters can read.
//!
//! What is here:
//!
//! - Ordered regex, exact-host and radix-tree path routing ([`router`])
//! - Re-readable request bodies from a bounded buffer pool ([`BufferPool`])
//! - Upstream dialing with a timeout, a per-connection deadline, an address
//!   cache and pooled keep-alive connections ([`UpstreamTransport`])
//! - hyper-based serving with graceful shutdown ([`Server`])
//!
//! What is not: TLS termination, load balancing, retries.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use edgeline::filter::{StringBodyFilter, UpstreamFilter};
//! use edgeline::router::HostRouter;
//! use edgeline::{Pipeline, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), edgeline::Error> {
//!     let body = Arc::new(StringBodyFilter::new());
//!     let api = UpstreamFilter::new("api.internal", 8081, Duration::from_secs(5));
//!     let web = UpstreamFilter::new("web.internal", 8082, Duration::from_secs(5));
//!
//!     let pipeline = Pipeline::builder()
//!         .filter_arc(body.clone())
//!         .router(HostRouter::new().host("api.example.com", api))
//!         .fallback(web)
//!         .response_filter_arc(body)
//!         .build();
//!
//!     Server::bind(([0, 0, 0, 0], 8080).into()).serve(pipeline).await
//! }
//! ```

mod body;
mod error;
mod pipeline;
mod pool;
mod request;

pub mod config;
pub mod filter;
pub mod responder;
pub mod router;
pub mod server;
pub mod upstream;

pub use body::Body;
pub use config::Config;
pub use error::{BodyError, BoxError, ConfigError, DialError, Error, ProxyError};
pub use http::StatusCode;
pub use pipeline::{Pipeline, PipelineBuilder, Upstream};
pub use pool::{BufferPool, PoolEntry, DEFAULT_MAX_BODY_SIZE};
pub use request::{CurrentStage, PipelineStage, Request, Response, RouteParams, StageStatus};
pub use server::Server;
pub use upstream::UpstreamTransport;
