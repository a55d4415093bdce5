//! Radix-tree path routing.
//!
//! One tree, O(path-length) lookup via [`matchit`]. Templates use `{name}`
//! for a segment and `{*name}` for the rest of the path:
//!
//! ```rust
//! # use edgeline::filter::request_filter_fn;
//! use edgeline::router::PathRouter;
//!
//! let router = PathRouter::new()
//!     .route("/users/{id}", request_filter_fn(|req| {
//!         let _id = req.param("id");
//!         None
//!     }))
//!     .route("/static/{*file}", request_filter_fn(|_| None));
//! ```

use std::sync::Arc;

use matchit::Router as MatchitRouter;

use super::{delegate, Router};
use crate::filter::{BoxFuture, RequestFilter};
use crate::request::{Request, Response, RouteParams};

/// Routes on the URI path. Captured parameters are stored on the request and
/// read back with [`Request::param`].
#[derive(Clone, Default)]
pub struct PathRouter {
    tree: MatchitRouter<Arc<dyn RequestFilter>>,
}

impl PathRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a path template. Returns `self` for chaining.
    ///
    /// # Panics
    ///
    /// Panics if the template is malformed or conflicts with one already
    /// registered.
    pub fn route(self, path: &str, filter: impl RequestFilter) -> Self {
        self.try_route(path, filter)
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"))
    }

    pub fn try_route(mut self, path: &str, filter: impl RequestFilter) -> Result<Self, matchit::InsertError> {
        let filter: Arc<dyn RequestFilter> = Arc::new(filter);
        self.tree.insert(path, filter)?;
        Ok(self)
    }
}

impl Router for PathRouter {
    fn select(&self, req: &mut Request) -> Option<Arc<dyn RequestFilter>> {
        let (filter, params) = {
            let matched = self.tree.at(req.uri().path()).ok()?;
            let params = matched
                .params
                .iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            (Arc::clone(matched.value), params)
        };
        req.http_mut().extensions_mut().insert(RouteParams(params));
        Some(filter)
    }

    fn name(&self) -> &str { "path_router" }
}

impl RequestFilter for PathRouter {
    fn filter_request<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Option<Response>> {
        let selected = self.select(req);
        delegate(selected, req)
    }

    fn name(&self) -> &str { "path_router" }
}
