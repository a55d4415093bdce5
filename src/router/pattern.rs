//! Ordered regular-expression routing.

use std::sync::Arc;

use regex::Regex;

use super::{delegate, Router};
use crate::filter::{BoxFuture, RequestFilter};
use crate::request::{Request, Response};

/// One `(pattern, filter)` pair of a [`PatternRouter`].
#[derive(Clone)]
pub struct RegexpRoute {
    pattern: Regex,
    filter: Arc<dyn RequestFilter>,
}

impl RegexpRoute {
    pub fn new(pattern: Regex, filter: Arc<dyn RequestFilter>) -> Self {
        Self { pattern, filter }
    }

    pub fn pattern(&self) -> &Regex { &self.pattern }

    /// The route's filter if `url` contains a match for the pattern. The
    /// search is unanchored; add `^`/`$` to the pattern to pin it.
    pub fn match_str(&self, url: &str) -> Option<&Arc<dyn RequestFilter>> {
        self.pattern.is_match(url).then_some(&self.filter)
    }
}

/// Routes on the request's effective URL. Routes are tried in registration
/// order and the first match wins; there is no other notion of priority.
#[derive(Clone, Default)]
pub struct PatternRouter {
    routes: Vec<RegexpRoute>,
}

impl PatternRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a route. Returns `self` for chaining.
    ///
    /// # Panics
    ///
    /// Panics if `pattern` is not a valid regular expression. Use
    /// [`try_route`](Self::try_route) for patterns that come from config.
    pub fn route(self, pattern: &str, filter: impl RequestFilter) -> Self {
        self.try_route(pattern, filter)
            .unwrap_or_else(|e| panic!("invalid route pattern `{pattern}`: {e}"))
    }

    pub fn try_route(mut self, pattern: &str, filter: impl RequestFilter) -> Result<Self, regex::Error> {
        self.routes.push(RegexpRoute::new(Regex::new(pattern)?, Arc::new(filter)));
        Ok(self)
    }

    pub fn add_route(&mut self, route: RegexpRoute) {
        self.routes.push(route);
    }

    pub fn routes(&self) -> &[RegexpRoute] { &self.routes }

    /// First route matching `url`.
    pub fn match_str(&self, url: &str) -> Option<&Arc<dyn RequestFilter>> {
        self.routes.iter().find_map(|route| route.match_str(url))
    }
}

impl Router for PatternRouter {
    fn select(&self, req: &mut Request) -> Option<Arc<dyn RequestFilter>> {
        self.match_str(&req.effective_url()).cloned()
    }

    fn name(&self) -> &str { "pattern_router" }
}

impl RequestFilter for PatternRouter {
    fn filter_request<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Option<Response>> {
        let selected = self.select(req);
        delegate(selected, req)
    }

    fn name(&self) -> &str { "pattern_router" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::testing::{named, request};

    #[test]
    fn single_route_matches_substring() {
        let route = RegexpRoute::new(Regex::new("one").unwrap(), named("one"));
        assert!(route.match_str("http://tester.com/one").is_some());
        assert!(route.match_str("http://tester.com/two").is_none());
    }

    #[test]
    fn first_registered_match_wins() {
        let first = named("first");
        let mut router = PatternRouter::new();
        router.add_route(RegexpRoute::new(Regex::new("/api").unwrap(), Arc::clone(&first)));
        router.add_route(RegexpRoute::new(Regex::new("/api/v1").unwrap(), named("second")));

        let mut req = request("/api/v1/users", "tester.com");
        let selected = router.select(&mut req).unwrap();
        assert!(Arc::ptr_eq(&selected, &first));
    }

    #[test]
    fn matches_against_host_and_path() {
        let router = PatternRouter::new()
            .route(r"^http://static\.", crate::filter::request_filter_fn(|_| None))
            .route(r"\.png$", crate::filter::request_filter_fn(|_| None));

        assert!(router.select(&mut request("/index.html", "static.example.com")).is_some());
        assert!(router.select(&mut request("/logo.png", "www.example.com")).is_some());
        assert!(router.select(&mut request("/index.html", "www.example.com")).is_none());
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        assert!(PatternRouter::new().try_route("(", crate::filter::request_filter_fn(|_| None)).is_err());
    }

    #[tokio::test]
    async fn as_a_filter_delegates_to_the_match() {
        let router = PatternRouter::new().route("/hello", crate::filter::request_filter_fn(|_| {
            Some(crate::responder::text(http::StatusCode::CREATED, "hi"))
        }));

        let res = router.filter_request(&mut request("/hello", "x.com")).await.unwrap();
        assert_eq!(res.status(), http::StatusCode::CREATED);
        assert!(router.filter_request(&mut request("/bye", "x.com")).await.is_none());
    }
}
