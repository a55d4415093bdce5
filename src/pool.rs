//! Bounded pool of reusable body buffers.
//!
//! One pool is shared by every request that passes through a filter; the
//! free list sits behind a `parking_lot` mutex that is held only for a push
//! or a pop. Buffers are handed out inside a [`PoolEntry`] and come back via
//! [`BufferPool::give`], which consumes the entry: an entry cannot be returned
//! twice.
//!
//! ```text
//! take(reader, max) ──▶ pop free Vec (or allocate) ──▶ read ≤ max+1 bytes
//!                                                      ├─ > max ─▶ Err(TooLarge), Vec back to pool
//!                                                      └─ ok ────▶ PoolEntry
//! give(entry) ──▶ clear Vec ──▶ push if free.len() < capacity, else drop
//! ```

use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::error::{BodyError, BoxError};

/// Largest body a [`StringBodyFilter`](crate::filter::StringBodyFilter) buffers by default: 10 MiB.
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 << 20;

/// A fixed-capacity pool of read buffers.
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
    buf_size: usize,
}

impl BufferPool {
    /// Creates an empty pool that keeps at most `capacity` idle buffers, each
    /// allocated with `buf_size` bytes of initial capacity.
    pub fn new(capacity: usize, buf_size: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            buf_size,
        }
    }

    pub fn capacity(&self) -> usize { self.capacity }

    /// Number of buffers currently waiting in the pool. Never exceeds [`capacity`](Self::capacity).
    pub fn idle(&self) -> usize { self.free.lock().len() }

    /// Bytes of capacity held by idle buffers.
    pub fn retained_bytes(&self) -> usize {
        self.free.lock().iter().map(Vec::capacity).sum()
    }

    /// Reads `reader` to its end into a pooled buffer.
    ///
    /// At most `max_size + 1` bytes are pulled from `reader`; a source longer
    /// than `max_size` is rejected with [`BodyError::TooLarge`] rather than
    /// truncated.
    pub async fn take<R>(&self, reader: R, max_size: usize) -> Result<PoolEntry, BodyError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = self.checkout();
        let limit = max_size.saturating_add(1) as u64;

        match reader.take(limit).read_to_end(&mut buf).await {
            Err(e) => {
                self.checkin(buf);
                Err(e.into())
            }
            Ok(_) if buf.len() > max_size => {
                self.checkin(buf);
                Err(BodyError::TooLarge { limit: max_size })
            }
            Ok(_) => Ok(PoolEntry::new(buf)),
        }
    }

    /// Collects an HTTP body into a pooled buffer, with the same limit policy
    /// as [`take`](Self::take). Trailers are discarded.
    pub async fn take_body<B>(&self, body: B, max_size: usize) -> Result<PoolEntry, BodyError>
    where
        B: http_body::Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let mut body = std::pin::pin!(body);
        let mut buf = self.checkout();

        while let Some(frame) = body.as_mut().frame().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    self.checkin(buf);
                    return Err(BodyError::Read(e.into()));
                }
            };
            let Ok(data) = frame.into_data() else { continue };
            if buf.len() + data.len() > max_size {
                self.checkin(buf);
                return Err(BodyError::TooLarge { limit: max_size });
            }
            buf.extend_from_slice(&data);
        }

        Ok(PoolEntry::new(buf))
    }

    /// Returns an entry's buffer to the pool. Safe to call from any task.
    pub fn give(&self, entry: PoolEntry) {
        self.checkin(entry.into_inner());
    }

    fn checkout(&self) -> Vec<u8> {
        self.free
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.buf_size))
    }

    fn checkin(&self, mut buf: Vec<u8>) {
        buf.clear();
        // a burst of large bodies must not stay resident
        if buf.capacity() > self.buf_size {
            buf.shrink_to(self.buf_size);
        }
        let mut free = self.free.lock();
        // Past capacity the buffer is simply dropped.
        if free.len() < self.capacity {
            free.push(buf);
        }
    }
}

// ── PoolEntry ─────────────────────────────────────────────────────────────────

/// A checked-out buffer holding one fully read body.
///
/// Reading consumes from the current position; [`rewind`](Self::rewind)
/// moves back to the start so the same content can be read again by a later
/// filter.
#[derive(Debug)]
pub struct PoolEntry {
    buf: Cursor<Vec<u8>>,
}

impl PoolEntry {
    fn new(buf: Vec<u8>) -> Self {
        Self { buf: Cursor::new(buf) }
    }

    /// The whole buffered content, independent of the read position.
    pub fn as_bytes(&self) -> &[u8] { self.buf.get_ref() }

    pub fn len(&self) -> usize { self.buf.get_ref().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Bytes not yet read.
    pub fn remaining(&self) -> usize {
        self.len().saturating_sub(self.buf.position() as usize)
    }

    /// Seeks back to the start. Calling it any number of times is harmless.
    pub fn rewind(&mut self) {
        self.buf.set_position(0);
    }

    /// Hands out everything from the current position as one chunk and moves
    /// to the end.
    pub(crate) fn next_chunk(&mut self) -> Option<Bytes> {
        let pos = self.buf.position() as usize;
        let data = self.buf.get_ref();
        if pos >= data.len() {
            return None;
        }
        let chunk = Bytes::copy_from_slice(&data[pos..]);
        let end = data.len() as u64;
        self.buf.set_position(end);
        Some(chunk)
    }

    fn into_inner(self) -> Vec<u8> { self.buf.into_inner() }
}

impl Read for PoolEntry {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut self.buf, out)
    }
}

impl Seek for PoolEntry {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.buf.seek(pos)
    }
}

impl AsyncRead for PoolEntry {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().buf).poll_read(cx, out)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http_body_util::Full;

    use super::*;

    #[tokio::test]
    async fn round_trip_reuses_buffer() {
        let pool = BufferPool::new(4, 64);
        let body = b"hello pooled world";

        let mut entry = pool.take(&body[..], 1024).await.unwrap();
        let mut first = Vec::new();
        Read::read_to_end(&mut entry, &mut first).unwrap();
        assert_eq!(first, body);
        pool.give(entry);
        assert_eq!(pool.idle(), 1);

        let mut entry = pool.take(&body[..], 1024).await.unwrap();
        assert_eq!(pool.idle(), 0);
        let mut second = Vec::new();
        Read::read_to_end(&mut entry, &mut second).unwrap();
        assert_eq!(second, body);
        pool.give(entry);
    }

    #[tokio::test]
    async fn rewind_reads_identical_bytes() {
        let pool = BufferPool::new(1, 16);
        let mut entry = pool.take(&b"abcdefghijklmnopqrstuvwxyz"[..], 100).await.unwrap();

        let mut first = String::new();
        Read::read_to_string(&mut entry, &mut first).unwrap();
        assert_eq!(entry.remaining(), 0);

        entry.rewind();
        entry.rewind();
        let mut second = String::new();
        Read::read_to_string(&mut entry, &mut second).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn oversized_source_is_rejected() {
        let pool = BufferPool::new(2, 8);
        let err = pool.take(&[7u8; 33][..], 32).await.unwrap_err();
        assert!(matches!(err, BodyError::TooLarge { limit: 32 }));
        // the scratch buffer went back to the pool
        assert_eq!(pool.idle(), 1);

        let entry = pool.take(&[7u8; 32][..], 32).await.unwrap();
        assert_eq!(entry.len(), 32);
    }

    #[tokio::test]
    async fn take_body_collects_frames() {
        let pool = BufferPool::new(1, 8);
        let entry = pool.take_body(Full::new(Bytes::from_static(b"frame")), 10).await.unwrap();
        assert_eq!(entry.as_bytes(), b"frame");

        let err = pool.take_body(Full::new(Bytes::from_static(b"too long body")), 10).await.unwrap_err();
        assert!(matches!(err, BodyError::TooLarge { .. }));
    }

    #[tokio::test]
    async fn large_buffers_shrink_on_return() {
        let pool = BufferPool::new(100, 1024);
        let big = vec![1u8; 1 << 20];

        let mut entries = Vec::new();
        for _ in 0..4 {
            entries.push(pool.take(&big[..], 2 << 20).await.unwrap());
        }
        for entry in entries {
            pool.give(entry);
        }

        assert_eq!(pool.idle(), 4);
        assert!(pool.retained_bytes() <= 4 * 1024, "{}", pool.retained_bytes());
    }

    #[test]
    fn next_chunk_drains_then_rewinds() {
        let mut entry = PoolEntry::new(b"xyz".to_vec());
        assert_eq!(entry.next_chunk().as_deref(), Some(&b"xyz"[..]));
        assert!(entry.next_chunk().is_none());
        entry.rewind();
        assert_eq!(entry.next_chunk().as_deref(), Some(&b"xyz"[..]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn occupancy_stays_bounded_under_concurrency() {
        let pool = Arc::new(BufferPool::new(3, 32));
        let mut tasks = tokio::task::JoinSet::new();

        for i in 0..64u8 {
            let pool = Arc::clone(&pool);
            tasks.spawn(async move {
                let data = vec![i; 100];
                let entry = pool.take(&data[..], 1024).await.unwrap();
                assert_eq!(entry.as_bytes(), &data[..]);
                tokio::task::yield_now().await;
                pool.give(entry);
                assert!(pool.idle() <= pool.capacity());
            });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap();
        }
        assert!(pool.idle() <= 3);
    }
}
