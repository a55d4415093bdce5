//! The filter pipeline.
//!
//! ```text
//!            ┌──────────── upstream, registration order ────────────┐
//! Request ──▶│ filter ─▶ filter ─▶ router ─┬─▶ selected filter (tail) │──┐
//!            └─────────────────────────────┴────────────────────────┘  │
//!                      first Some(response) stops the phase             │
//!                                                                       ▼
//!                                             no response? ─▶ fallback (proxy / 404)
//!                                                                       │
//!            ┌──────────── downstream, registration order ──────────┐  │
//! Response ◀─│ filter ─▶ filter ─▶ filter    (always, every one)     │◀─┘
//!            └──────────────────────────────────────────────────────┘
//! ```
//!
//! Every filter invocation runs inside its own stage on the [`Request`]: a
//! fresh [`StageStatus::Normal`](crate::StageStatus::Normal) status and empty
//! metadata, archived under the filter's name once the filter returns.
//!
//! A router registered with [`PipelineBuilder::router`] redirects control:
//! once it selects a filter, that filter's result is the result of the whole
//! upstream phase, even when it is `None`. A router that selects nothing lets
//! the remaining upstream entries run.

use std::sync::Arc;

use http::StatusCode;
use tracing::{debug, trace};

use crate::filter::{BoxFuture, RequestFilter, ResponseFilter};
use crate::request::{Request, Response};
use crate::responder;
use crate::router::Router;

/// One entry of the upstream list.
#[derive(Clone)]
pub enum Upstream {
    Filter(Arc<dyn RequestFilter>),
    Router(Arc<dyn Router>),
}

/// An ordered pair of filter lists executed around a fallback action.
///
/// Build once at startup and share behind an `Arc`; running a request only
/// takes `&self`.
#[derive(Clone, Default)]
pub struct Pipeline {
    upstream: Vec<Upstream>,
    downstream: Vec<Arc<dyn ResponseFilter>>,
    fallback: Option<Arc<dyn RequestFilter>>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Runs `req` through the pipeline and returns the response to send.
    ///
    /// Never fails: when no filter and no fallback answers, the response is
    /// `404 Not Found`.
    pub async fn run(&self, req: &mut Request) -> Response {
        let mut res = match self.execute(req).await {
            Some(res) => res,
            None => self.fall_back(req).await,
        };
        self.down(req, &mut res).await;

        debug!(
            request_id = %req.id(),
            status = res.status().as_u16(),
            stages = req.stages().len(),
            elapsed_us = req.elapsed().as_micros() as u64,
            "pipeline finished"
        );
        res
    }

    async fn execute(&self, req: &mut Request) -> Option<Response> {
        for entry in &self.upstream {
            match entry {
                Upstream::Filter(filter) => {
                    if let Some(res) = exec_filter(req, filter.as_ref()).await {
                        debug!(request_id = %req.id(), stage = filter.name(), "request answered");
                        return Some(res);
                    }
                }
                Upstream::Router(router) => {
                    let parent = req.start_stage(router.name());
                    let selected = router.select(req);
                    req.finish_stage(parent);

                    if let Some(filter) = selected {
                        trace!(request_id = %req.id(), router = router.name(), target = filter.name(), "routed");
                        return exec_filter(req, filter.as_ref()).await;
                    }
                }
            }
        }
        None
    }

    async fn fall_back(&self, req: &mut Request) -> Response {
        let res = match &self.fallback {
            Some(filter) => exec_filter(req, filter.as_ref()).await,
            None => None,
        };
        res.unwrap_or_else(|| responder::text(StatusCode::NOT_FOUND, "Not Found"))
    }

    async fn down(&self, req: &mut Request, res: &mut Response) {
        for filter in &self.downstream {
            let parent = req.start_stage(filter.name());
            filter.filter_response(req, res).await;
            req.finish_stage(parent);
        }
    }
}

/// A pipeline can stand wherever a filter can, so routers can select whole
/// sub-pipelines. It always answers.
impl RequestFilter for Pipeline {
    fn filter_request<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Option<Response>> {
        Box::pin(async move { Some(self.run(req).await) })
    }

    fn name(&self) -> &str { "pipeline" }
}

async fn exec_filter(req: &mut Request, filter: &dyn RequestFilter) -> Option<Response> {
    let parent = req.start_stage(filter.name());
    let res = filter.filter_request(req).await;
    req.finish_stage(parent);
    res
}

// ── PipelineBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Pipeline`]. Entries run in the order they are added.
#[derive(Default)]
pub struct PipelineBuilder {
    upstream: Vec<Upstream>,
    downstream: Vec<Arc<dyn ResponseFilter>>,
    fallback: Option<Arc<dyn RequestFilter>>,
}

impl PipelineBuilder {
    /// Appends an upstream filter.
    pub fn filter(self, filter: impl RequestFilter) -> Self {
        self.filter_arc(Arc::new(filter))
    }

    /// Appends an upstream filter that is shared with other lists or pipelines.
    pub fn filter_arc(mut self, filter: Arc<dyn RequestFilter>) -> Self {
        self.upstream.push(Upstream::Filter(filter));
        self
    }

    /// Appends a router to the upstream list.
    pub fn router(self, router: impl Router) -> Self {
        self.router_arc(Arc::new(router))
    }

    pub fn router_arc(mut self, router: Arc<dyn Router>) -> Self {
        self.upstream.push(Upstream::Router(router));
        self
    }

    /// Appends a downstream filter.
    pub fn response_filter(self, filter: impl ResponseFilter) -> Self {
        self.response_filter_arc(Arc::new(filter))
    }

    pub fn response_filter_arc(mut self, filter: Arc<dyn ResponseFilter>) -> Self {
        self.downstream.push(filter);
        self
    }

    /// Sets the action run when no upstream entry answers, typically an
    /// [`UpstreamFilter`](crate::filter::UpstreamFilter). Without one the
    /// pipeline answers `404 Not Found`.
    pub fn fallback(self, filter: impl RequestFilter) -> Self {
        self.fallback_arc(Arc::new(filter))
    }

    pub fn fallback_arc(mut self, filter: Arc<dyn RequestFilter>) -> Self {
        self.fallback = Some(filter);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            upstream: self.upstream,
            downstream: self.downstream,
            fallback: self.fallback,
        }
    }
}
