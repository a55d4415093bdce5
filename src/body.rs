//! Request and response body type.
//!
//! A single enum covers every body the pipeline moves around: nothing, a
//! fixed chunk, a live hyper stream, a pooled buffer that can be rewound, a
//! channel fed by a producer task, or a lost body that only errors.

use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};
use hyper::body::Incoming;
use tokio::sync::mpsc;

use crate::error::BoxError;
use crate::pool::PoolEntry;

/// Body of a [`Request`](crate::Request) or [`Response`](crate::Response).
#[derive(Debug, Default)]
pub enum Body {
    #[default]
    Empty,
    /// One chunk, yielded once.
    Full(Option<Bytes>),
    /// A streaming body straight off the wire.
    Incoming(Incoming),
    /// A fully read body held in a pooled buffer.
    Buffered(PoolEntry),
    /// Chunks pushed by a producer task. An `Err` aborts the stream.
    Channel(mpsc::Receiver<Result<Bytes, BoxError>>),
    /// A body that was lost; the first poll yields the error.
    Failed(Option<BoxError>),
}

impl Body {
    pub fn empty() -> Self { Self::Empty }

    pub fn full(data: impl Into<Bytes>) -> Self {
        Self::Full(Some(data.into()))
    }

    /// A body whose stream fails at once, so anything sending it aborts
    /// instead of promising bytes it cannot deliver.
    pub fn failed(err: impl Into<BoxError>) -> Self {
        Self::Failed(Some(err.into()))
    }

    /// The pooled buffer behind this body, if it was buffered.
    pub fn buffered(&self) -> Option<&PoolEntry> {
        match self {
            Self::Buffered(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn buffered_mut(&mut self) -> Option<&mut PoolEntry> {
        match self {
            Self::Buffered(entry) => Some(entry),
            _ => None,
        }
    }

    /// Takes the pooled buffer out, leaving an empty body behind.
    pub fn take_buffered(&mut self) -> Option<PoolEntry> {
        match mem::take(self) {
            Self::Buffered(entry) => Some(entry),
            other => {
                *self = other;
                None
            }
        }
    }

    /// Produces a body to send upstream.
    ///
    /// A buffered body stays in place, rewound, and a copy of its bytes is
    /// forwarded so response filters can still reach the pooled buffer. Any
    /// other body is moved out.
    pub fn for_forwarding(&mut self) -> Body {
        match self {
            Self::Buffered(entry) => {
                entry.rewind();
                Body::full(Bytes::copy_from_slice(entry.as_bytes()))
            }
            other => mem::take(other),
        }
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.get_mut() {
            Self::Empty => Poll::Ready(None),
            Self::Full(chunk) => Poll::Ready(chunk.take().map(|data| Ok(Frame::data(data)))),
            Self::Incoming(incoming) => Pin::new(incoming).poll_frame(cx).map_err(Into::into),
            Self::Buffered(entry) => Poll::Ready(entry.next_chunk().map(|data| Ok(Frame::data(data)))),
            Self::Channel(rx) => rx.poll_recv(cx).map(|next| next.map(|chunk| chunk.map(Frame::data))),
            Self::Failed(err) => Poll::Ready(err.take().map(Err)),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Full(chunk) => chunk.is_none(),
            Self::Incoming(incoming) => incoming.is_end_stream(),
            Self::Buffered(entry) => entry.remaining() == 0,
            Self::Channel(_) => false,
            Self::Failed(err) => err.is_none(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            Self::Empty => SizeHint::with_exact(0),
            Self::Full(chunk) => SizeHint::with_exact(chunk.as_ref().map_or(0, |c| c.len() as u64)),
            Self::Incoming(incoming) => incoming.size_hint(),
            Self::Buffered(entry) => SizeHint::with_exact(entry.remaining() as u64),
            Self::Channel(_) | Self::Failed(_) => SizeHint::default(),
        }
    }
}

impl From<Bytes> for Body {
    fn from(data: Bytes) -> Self { Self::full(data) }
}

impl From<Vec<u8>> for Body {
    fn from(data: Vec<u8>) -> Self { Self::full(data) }
}

impl From<String> for Body {
    fn from(data: String) -> Self { Self::full(data) }
}

impl From<&'static str> for Body {
    fn from(data: &'static str) -> Self { Self::full(Bytes::from_static(data.as_bytes())) }
}

impl From<Incoming> for Body {
    fn from(incoming: Incoming) -> Self { Self::Incoming(incoming) }
}

impl From<PoolEntry> for Body {
    fn from(entry: PoolEntry) -> Self { Self::Buffered(entry) }
}
