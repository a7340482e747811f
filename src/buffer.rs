//! # Buffer Pool
//!
//! Reusable byte buffers shared across connections. The parser draws a buffer
//! from the pool whenever it has to reassemble bytes (chunked bodies, multipart
//! over a split receive sequence) and the buffer goes back to the pool when the
//! owning [`PooledBuffer`] is dropped.
//!
//! Ownership is explicit: whoever holds the `PooledBuffer` is responsible for
//! its release, and release happens on every exit path because it is tied to
//! `Drop`. A buffer that is frozen into [`Bytes`] leaves the pool for good.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use crossbeam::queue::ArrayQueue;

/// Default number of idle buffers kept by a pool.
pub const DEFAULT_POOL_CAPACITY: usize = 256;

/// Default initial capacity of a freshly allocated buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Shared pool of growable byte buffers.
///
/// Buffers are kept in a lock-free bounded queue. When the queue is full a
/// returned buffer is simply dropped; when it is empty a new one is allocated.
pub struct BufferPool {
    idle: ArrayQueue<BytesMut>,
    buffer_size: usize,
    max_retained: usize,
    outstanding: AtomicUsize,
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("available", &self.idle.len())
            .field("outstanding", &self.outstanding())
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY, DEFAULT_BUFFER_SIZE)
    }
}

impl BufferPool {
    /// Create a pool holding at most `capacity` idle buffers of `buffer_size`
    /// initial bytes each.
    #[must_use]
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        Self {
            idle: ArrayQueue::new(capacity.max(1)),
            buffer_size,
            // Buffers that ballooned while decoding a large body are not worth
            // keeping around for the next small request.
            max_retained: buffer_size.saturating_mul(64),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Create a pool wrapped in an `Arc`, ready to be shared by parsers.
    #[must_use]
    pub fn shared(capacity: usize, buffer_size: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity, buffer_size))
    }

    /// Take a cleared buffer from the pool (or allocate one).
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let buf = self
            .idle
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_size));
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        PooledBuffer {
            buf: Some(buf),
            pool: Arc::clone(self),
        }
    }

    /// Number of idle buffers ready for reuse.
    #[must_use]
    pub fn available(&self) -> usize {
        self.idle.len()
    }

    /// Number of buffers currently checked out.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    fn release(&self, mut buf: BytesMut) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        if buf.capacity() > self.max_retained {
            return;
        }
        buf.clear();
        // A full queue just means we drop this one.
        let _ = self.idle.push(buf);
    }

    fn detach(&self) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A buffer checked out of a [`BufferPool`].
///
/// Returned to the pool on drop.
pub struct PooledBuffer {
    buf: Option<BytesMut>,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    // `buf` is only taken in `freeze` and `drop`, both of which consume self.
    fn inner(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }

    fn inner_mut(&mut self) -> &mut BytesMut {
        self.buf.get_or_insert_with(BytesMut::new)
    }

    /// Append bytes, growing the buffer geometrically if required.
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        let buf = self.inner_mut();
        if buf.capacity() - buf.len() < data.len() {
            let wanted = (buf.len() + data.len()).max(buf.capacity() * 2);
            buf.reserve(wanted - buf.len());
        }
        buf.extend_from_slice(data);
    }

    /// Reserve room for at least `additional` more bytes.
    pub fn reserve(&mut self, additional: usize) {
        self.inner_mut().reserve(additional);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner().is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.as_ref().map_or(0, BytesMut::capacity)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.inner()
    }

    /// Detach the bytes from the pool as an immutable, cheaply cloneable
    /// [`Bytes`]. The storage is not returned to the pool.
    #[must_use]
    pub fn freeze(mut self) -> Bytes {
        let buf = self.buf.take().unwrap_or_default();
        self.pool.detach();
        buf.freeze()
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}
