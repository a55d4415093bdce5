//! Filter traits and type erasure.
//!
//! # Two independent capabilities
//!
//! A filter takes part in one or both phases of a [`Pipeline`](crate::Pipeline):
//!
//! ```text
//! RequestFilter   (&mut Request)                 → Option<Response>   upstream phase
//! ResponseFilter  (&mut Request, &mut Response)  → ()                 downstream phase
//! ```
//!
//! Returning `Some(response)` from [`RequestFilter::filter_request`] ends the
//! upstream phase for that request. Response filters communicate only by
//! mutation and side effects; there is nothing to return.
//!
//! A type that needs both phases (e.g. [`StringBodyFilter`] buffers a body on
//! the way in and hands the buffer back on the way out) implements both traits
//! and is registered in both lists through one shared `Arc`.
//!
//! # How async filters are stored
//!
//! Filters of different concrete types live side by side in one `Vec`, so the
//! pipeline holds them as `Arc<dyn RequestFilter>` and each call returns a
//! [`BoxFuture`]. The cost per stage is one virtual call plus one boxed
//! future, negligible next to network I/O.
//!
//! Filters hold no per-request state. Anything request-scoped goes on the
//! [`Request`], usually in its current stage's metadata.

pub mod body;
pub mod upstream;

use std::future::Future;
use std::pin::Pin;

use crate::request::{Request, Response};

pub use body::StringBodyFilter;
pub use upstream::UpstreamFilter;

/// A heap-allocated, type-erased future borrowing from the filter and the request.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Upstream-phase capability: inspect, transform or answer a request.
pub trait RequestFilter: Send + Sync + 'static {
    /// `Some(response)` stops the remaining upstream filters; `None` continues.
    fn filter_request<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Option<Response>>;

    /// Label of the pipeline stage this filter runs in.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Downstream-phase capability: finalize a response or release resources.
pub trait ResponseFilter: Send + Sync + 'static {
    fn filter_response<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
    ) -> BoxFuture<'a, ()>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

// ── Closure adapters ──────────────────────────────────────────────────────────

/// A synchronous closure acting as a [`RequestFilter`].
///
/// Build one with [`request_filter_fn`] or [`RequestFilterFn::named`].
pub struct RequestFilterFn<F> {
    name: &'static str,
    f: F,
}

impl<F> RequestFilterFn<F>
where
    F: Fn(&mut Request) -> Option<Response> + Send + Sync + 'static,
{
    pub fn named(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

/// Wraps a closure as a [`RequestFilter`].
///
/// ```rust
/// use edgeline::filter::request_filter_fn;
/// use edgeline::{responder, StatusCode};
///
/// let deny_admin = request_filter_fn(|req| {
///     req.uri()
///         .path()
///         .starts_with("/admin")
///         .then(|| responder::text(StatusCode::FORBIDDEN, "forbidden"))
/// });
/// ```
pub fn request_filter_fn<F>(f: F) -> RequestFilterFn<F>
where
    F: Fn(&mut Request) -> Option<Response> + Send + Sync + 'static,
{
    RequestFilterFn::named("request_filter_fn", f)
}

impl<F> RequestFilter for RequestFilterFn<F>
where
    F: Fn(&mut Request) -> Option<Response> + Send + Sync + 'static,
{
    fn filter_request<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Option<Response>> {
        let res = (self.f)(req);
        Box::pin(std::future::ready(res))
    }

    fn name(&self) -> &str { self.name }
}

/// A synchronous closure acting as a [`ResponseFilter`].
pub struct ResponseFilterFn<F> {
    name: &'static str,
    f: F,
}

impl<F> ResponseFilterFn<F>
where
    F: Fn(&mut Request, &mut Response) + Send + Sync + 'static,
{
    pub fn named(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

/// Wraps a closure as a [`ResponseFilter`].
pub fn response_filter_fn<F>(f: F) -> ResponseFilterFn<F>
where
    F: Fn(&mut Request, &mut Response) + Send + Sync + 'static,
{
    ResponseFilterFn::named("response_filter_fn", f)
}

impl<F> ResponseFilter for ResponseFilterFn<F>
where
    F: Fn(&mut Request, &mut Response) + Send + Sync + 'static,
{
    fn filter_response<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
    ) -> BoxFuture<'a, ()> {
        (self.f)(req, res);
        Box::pin(std::future::ready(()))
    }

    fn name(&self) -> &str { self.name }
}
