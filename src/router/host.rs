//! Virtual-host routing.

use std::collections::HashMap;
use std::sync::Arc;

use super::{delegate, Router};
use crate::filter::{BoxFuture, RequestFilter};
use crate::request::{Request, Response};

/// Routes on the `Host` header by exact string comparison.
///
/// The header is looked up verbatim: no case folding, no port stripping and
/// no suffix or wildcard fallback. `example.com` does not match a table that
/// only knows `www.example.com`; register every spelling you want to serve.
#[derive(Clone, Default)]
pub struct HostRouter {
    hosts: HashMap<String, Arc<dyn RequestFilter>>,
}

impl HostRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a host. Returns `self` for chaining.
    pub fn host(mut self, host: impl Into<String>, filter: impl RequestFilter) -> Self {
        self.add_match(host, Arc::new(filter));
        self
    }

    /// Adds or replaces the filter for `host`.
    pub fn add_match(&mut self, host: impl Into<String>, filter: Arc<dyn RequestFilter>) {
        self.hosts.insert(host.into(), filter);
    }

    pub fn len(&self) -> usize { self.hosts.len() }

    pub fn is_empty(&self) -> bool { self.hosts.is_empty() }
}

impl Router for HostRouter {
    fn select(&self, req: &mut Request) -> Option<Arc<dyn RequestFilter>> {
        self.hosts.get(req.host()?).cloned()
    }

    fn name(&self) -> &str { "host_router" }
}

impl RequestFilter for HostRouter {
    fn filter_request<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Option<Response>> {
        let selected = self.select(req);
        delegate(selected, req)
    }

    fn name(&self) -> &str { "host_router" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::testing::{named, request};

    #[test]
    fn selects_the_exact_host() {
        let www = named("www");
        let dev = named("dev");
        let mut router = HostRouter::new();
        router.add_match("www.example.com", Arc::clone(&www));
        router.add_match("dev.example.com", Arc::clone(&dev));

        let selected = router.select(&mut request("/", "dev.example.com")).unwrap();
        assert!(Arc::ptr_eq(&selected, &dev));
    }

    #[test]
    fn no_fuzzy_fallback() {
        let mut router = HostRouter::new();
        router.add_match("www.example.com", named("www"));
        router.add_match("dev.example.com", named("dev"));

        assert!(router.select(&mut request("/", "example.com")).is_none());
        assert!(router.select(&mut request("/", "WWW.EXAMPLE.COM")).is_none());
        assert!(router.select(&mut request("/", "www.example.com:80")).is_none());
    }

    #[test]
    fn missing_host_matches_nothing() {
        let router = HostRouter::new().host("a.com", crate::filter::request_filter_fn(|_| None));
        let mut req = crate::Request::new(http::Request::get("/").body(crate::Body::empty()).unwrap());
        assert!(router.select(&mut req).is_none());
        assert_eq!(router.len(), 1);
    }
}
