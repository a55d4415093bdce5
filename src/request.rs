//! Per-request context carried through a [`Pipeline`](crate::Pipeline).
//!
//! A [`Request`] wraps the parsed `http::Request` together with everything
//! filters use to talk to each other: a correlation id, the status of the
//! stage currently running, and the records of every stage already run.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use http::{Extensions, HeaderMap, Method, Uri};
use uuid::Uuid;

use crate::body::Body;

/// Response type produced by filters and the pipeline.
pub type Response = http::Response<Body>;

/// Outcome of one pipeline stage, as recorded by the filter that ran in it.
///
/// Every stage starts as [`Normal`](Self::Normal). The two skip variants let
/// response filters tell "there was nothing to do" apart from "there was
/// something, but it was declined".
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum StageStatus {
    #[default]
    Normal = 0,
    /// Nothing to process (e.g. a `GET` has no body to buffer).
    Skip = 1,
    /// The filter tried and failed.
    Fail = 2,
    /// Processing declined or its input ignored (e.g. multipart, oversized).
    Ignored = 3,
}

impl StageStatus {
    /// Stable numeric code, handy for logs.
    pub fn code(self) -> u8 { self as u8 }

    pub fn is_skip(self) -> bool {
        matches!(self, Self::Skip | Self::Ignored)
    }
}

/// The stage that is running right now.
#[derive(Debug)]
pub struct CurrentStage {
    name: String,
    pub status: StageStatus,
    /// Stage-local data. Archived with the stage when it finishes.
    pub metadata: Extensions,
    started: Instant,
}

impl CurrentStage {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            status: StageStatus::Normal,
            metadata: Extensions::new(),
            started: Instant::now(),
        }
    }

    pub fn name(&self) -> &str { &self.name }
}

/// A finished stage.
#[derive(Debug)]
pub struct PipelineStage {
    pub name: String,
    pub status: StageStatus,
    pub metadata: Extensions,
    pub duration: Duration,
}

/// Path parameters captured by a [`PathRouter`](crate::router::PathRouter).
#[derive(Clone, Debug, Default)]
pub struct RouteParams(pub HashMap<String, String>);

/// One in-flight HTTP transaction.
///
/// Owned by the task serving the connection and never shared; every filter
/// receives it as `&mut Request`.
pub struct Request {
    id: Uuid,
    http: http::Request<Body>,
    remote_addr: Option<SocketAddr>,
    started: Instant,
    current: CurrentStage,
    stages: Vec<PipelineStage>,
}

impl Request {
    pub fn new<B: Into<Body>>(req: http::Request<B>) -> Self {
        Self {
            id: Uuid::new_v4(),
            http: req.map(Into::into),
            remote_addr: None,
            started: Instant::now(),
            current: CurrentStage::new("request"),
            stages: Vec::new(),
        }
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Correlation id, unique per request.
    pub fn id(&self) -> Uuid { self.id }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }
    pub fn http(&self) -> &http::Request<Body> { &self.http }
    pub fn http_mut(&mut self) -> &mut http::Request<Body> { &mut self.http }
    pub fn into_http(self) -> http::Request<Body> { self.http }
    pub fn method(&self) -> &Method { self.http.method() }
    pub fn uri(&self) -> &Uri { self.http.uri() }
    pub fn headers(&self) -> &HeaderMap { self.http.headers() }
    pub fn body_mut(&mut self) -> &mut Body { self.http.body_mut() }

    /// Header lookup; `None` when absent or not valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.http.headers().get(name)?.to_str().ok()
    }

    /// The `Host` header exactly as sent, falling back to the URI authority
    /// (HTTP/2 `:authority`).
    pub fn host(&self) -> Option<&str> {
        self.header("host")
            .or_else(|| self.http.uri().authority().map(|a| a.as_str()))
    }

    /// Scheme, host, path and query as one string.
    ///
    /// Absolute-form URIs are returned unchanged; origin-form URIs are
    /// completed from the `Host` header.
    pub fn effective_url(&self) -> String {
        let uri = self.http.uri();
        if uri.scheme().is_some() && uri.authority().is_some() {
            return uri.to_string();
        }
        let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
        match self.header("host") {
            Some(host) => format!("http://{host}{path}"),
            None => path.to_owned(),
        }
    }

    /// A path parameter captured by a [`PathRouter`](crate::router::PathRouter).
    pub fn param(&self, key: &str) -> Option<&str> {
        self.http
            .extensions()
            .get::<RouteParams>()?
            .0
            .get(key)
            .map(String::as_str)
    }

    pub fn stage(&self) -> &CurrentStage { &self.current }
    pub fn stage_mut(&mut self) -> &mut CurrentStage { &mut self.current }

    /// Sets the status of the running stage.
    pub fn set_status(&mut self, status: StageStatus) {
        self.current.status = status;
    }

    /// Finished stages, oldest first.
    pub fn stages(&self) -> &[PipelineStage] { &self.stages }

    /// Status of the most recent finished stage called `name`.
    pub fn stage_status(&self, name: &str) -> Option<StageStatus> {
        self.stages
            .iter()
            .rev()
            .find(|s| s.name == name)
            .map(|s| s.status)
    }

    /// Time since the request was accepted.
    pub fn elapsed(&self) -> Duration { self.started.elapsed() }

    /// Opens a fresh stage and returns the one it displaces, which
    /// [`finish_stage`](Self::finish_stage) restores.
    pub(crate) fn start_stage(&mut self, name: &str) -> CurrentStage {
        std::mem::replace(&mut self.current, CurrentStage::new(name))
    }

    pub(crate) fn finish_stage(&mut self, parent: CurrentStage) {
        let stage = std::mem::replace(&mut self.current, parent);
        self.stages.push(PipelineStage {
            duration: stage.started.elapsed(),
            name: stage.name,
            status: stage.status,
            metadata: stage.metadata,
        });
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("method", self.http.method())
            .field("uri", self.http.uri())
            .field("stage", &self.current.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(uri: &str, host: Option<&str>) -> Request {
        let mut builder = http::Request::get(uri);
        if let Some(host) = host {
            builder = builder.header("host", host);
        }
        Request::new(builder.body(Body::empty()).unwrap())
    }

    #[test]
    fn effective_url_completes_origin_form() {
        assert_eq!(get("/one?x=1", Some("tester.com")).effective_url(), "http://tester.com/one?x=1");
        assert_eq!(get("http://other.com/two", Some("tester.com")).effective_url(), "http://other.com/two");
        assert_eq!(get("/hello", None).effective_url(), "/hello");
    }

    #[test]
    fn host_is_verbatim() {
        assert_eq!(get("/", Some("WWW.Example.com:8080")).host(), Some("WWW.Example.com:8080"));
        assert_eq!(get("http://authority.com/", None).host(), Some("authority.com"));
    }

    #[test]
    fn stages_start_normal_and_are_archived() {
        let mut req = get("/", None);
        let parent = req.start_stage("first");
        req.set_status(StageStatus::Ignored);
        req.stage_mut().metadata.insert(42u32);
        req.finish_stage(parent);

        let parent = req.start_stage("second");
        assert_eq!(req.stage().status, StageStatus::Normal);
        req.finish_stage(parent);

        assert_eq!(req.stage_status("first"), Some(StageStatus::Ignored));
        assert_eq!(req.stage_status("second"), Some(StageStatus::Normal));
        assert_eq!(req.stage_status("third"), None);
        assert_eq!(req.stages()[0].metadata.get::<u32>(), Some(&42));
    }

    #[test]
    fn nested_stages_restore_the_outer_stage() {
        let mut req = get("/", None);
        let root = req.start_stage("outer");
        req.set_status(StageStatus::Skip);

        let outer = req.start_stage("inner");
        assert_eq!(req.stage().name(), "inner");
        req.finish_stage(outer);

        assert_eq!(req.stage().name(), "outer");
        assert_eq!(req.stage().status, StageStatus::Skip);
        req.finish_stage(root);

        let names: Vec<_> = req.stages().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["inner", "outer"]);
    }

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(StageStatus::Normal.code(), 0);
        assert_eq!(StageStatus::Skip.code(), 1);
        assert_eq!(StageStatus::Fail.code(), 2);
        assert_eq!(StageStatus::Ignored.code(), 3);
        assert!(StageStatus::Ignored.is_skip() && !StageStatus::Fail.is_skip());
    }
}
