//! Request routers.
//!
//! A router maps a request to the filter (often a whole sub-[`Pipeline`](crate::Pipeline))
//! that should handle it. Three matching strategies ship with the crate:
//!
//! | Router            | Matches on                         | Strategy                   |
//! |-------------------|------------------------------------|----------------------------|
//! | [`PatternRouter`] | effective URL (`scheme://host/path?query`) | regex search, first match wins |
//! | [`HostRouter`]    | `Host` header, verbatim            | exact string lookup        |
//! | [`PathRouter`]    | URI path                           | radix tree via [`matchit`] |
//!
//! Routing tables are built once and never mutated while serving traffic.
//!
//! Every router is also a [`RequestFilter`]: used that way it selects and
//! immediately delegates, answering `None` when nothing matches. Registered
//! with [`PipelineBuilder::router`](crate::PipelineBuilder::router) instead,
//! a successful selection also ends the outer upstream phase.

mod host;
mod path;
mod pattern;

use std::sync::Arc;

pub use host::HostRouter;
pub use path::PathRouter;
pub use pattern::{PatternRouter, RegexpRoute};

use crate::filter::{BoxFuture, RequestFilter};
use crate::request::{Request, Response};

/// Selects the filter that should handle a request.
pub trait Router: Send + Sync + 'static {
    /// `None` when the request matches nothing.
    ///
    /// Takes the request mutably so a router can attach what it learned while
    /// matching (captured path parameters, for instance).
    fn select(&self, req: &mut Request) -> Option<Arc<dyn RequestFilter>>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Runs the selected filter, or answers `None` when there is none.
fn delegate<'a>(
    selected: Option<Arc<dyn RequestFilter>>,
    req: &'a mut Request,
) -> BoxFuture<'a, Option<Response>> {
    Box::pin(async move {
        match selected {
            Some(filter) => filter.filter_request(req).await,
            None => None,
        }
    })
}
