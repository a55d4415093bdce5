//! Request-body buffering so several filters can read the same body.

use std::sync::Arc;

use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::Method;
use tracing::{debug, trace};

use super::{BoxFuture, RequestFilter, ResponseFilter};
use crate::body::Body;
use crate::error::BodyError;
use crate::pool::{BufferPool, DEFAULT_MAX_BODY_SIZE};
use crate::request::{Request, Response, StageStatus};

const REQUEST_STAGE: &str = "string_body";
const RESPONSE_STAGE: &str = "string_body_return";

/// Reads `POST`/`PUT` bodies into a pooled buffer and swaps the request body
/// for a rewindable [`Body::Buffered`].
///
/// Register the same `Arc` in both lists: upstream to buffer, downstream to
/// hand the buffer back to the pool.
///
/// Stage status left by the request side:
///
/// | Status    | Meaning                                                   |
/// |-----------|-----------------------------------------------------------|
/// | `Normal`  | body buffered                                             |
/// | `Skip`    | method carries no body worth buffering                    |
/// | `Ignored` | no length, multipart, oversized or unreadable; body left as is when possible |
pub struct StringBodyFilter {
    pool: Arc<BufferPool>,
    max_size: usize,
}

impl StringBodyFilter {
    /// A filter with its own pool of 100 buffers of 1 KiB and a 10 MiB limit.
    pub fn new() -> Self {
        Self::with_pool(Arc::new(BufferPool::new(100, 1024)), DEFAULT_MAX_BODY_SIZE)
    }

    pub fn with_pool(pool: Arc<BufferPool>, max_size: usize) -> Self {
        Self { pool, max_size }
    }

    pub fn pool(&self) -> &Arc<BufferPool> { &self.pool }

    /// Returns the request's buffer to the pool, if it holds one. Usable
    /// directly when a flow has a better place for it than the response phase.
    pub fn return_buffer(&self, req: &mut Request) {
        if let Some(entry) = req.body_mut().take_buffered() {
            self.pool.give(entry);
        }
    }

    /// `Ok(true)` when the body was buffered, `Ok(false)` when it was left alone.
    async fn read_request_body(&self, req: &mut Request) -> Result<bool, BodyError> {
        let content_type = req.header(CONTENT_TYPE.as_str()).unwrap_or_default();
        if content_type.split(';').next().map(str::trim) == Some("multipart/form-data") {
            return Ok(false);
        }

        let length = req
            .header(CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        if length == 0 {
            return Ok(false);
        }
        // Announced too large: reject without consuming the body.
        if length > self.max_size as u64 {
            return Err(BodyError::TooLarge { limit: self.max_size });
        }

        let body = std::mem::take(req.body_mut());
        match self.pool.take_body(body, self.max_size).await {
            Ok(entry) => {
                *req.body_mut() = Body::Buffered(entry);
                Ok(true)
            }
            Err(e) => {
                // The original stream is consumed. Anything forwarding this
                // request must fail fast rather than send a short body.
                *req.body_mut() = Body::failed(format!("request body lost: {e}"));
                Err(e)
            }
        }
    }
}

impl Default for StringBodyFilter {
    fn default() -> Self { Self::new() }
}

impl RequestFilter for StringBodyFilter {
    fn filter_request<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Option<Response>> {
        Box::pin(async move {
            if req.method() != Method::POST && req.method() != Method::PUT {
                req.set_status(StageStatus::Skip);
                return None;
            }

            match self.read_request_body(req).await {
                Ok(true) => {}
                Ok(false) => {
                    req.set_status(StageStatus::Ignored);
                    debug!(request_id = %req.id(), "no request body or ignored");
                }
                Err(e) => {
                    req.set_status(StageStatus::Ignored);
                    debug!(request_id = %req.id(), error = %e, "request body not buffered");
                }
            }
            None
        })
    }

    fn name(&self) -> &str { REQUEST_STAGE }
}

impl ResponseFilter for StringBodyFilter {
    fn filter_response<'a>(
        &'a self,
        req: &'a mut Request,
        _res: &'a mut Response,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if req.stage_status(REQUEST_STAGE).is_some_and(StageStatus::is_skip) {
                trace!(request_id = %req.id(), "no buffer to return");
                return;
            }
            self.return_buffer(req);
        })
    }

    fn name(&self) -> &str { RESPONSE_STAGE }
}
