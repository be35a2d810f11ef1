//! Share-counted pooled byte buffers and their derived views

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use crate::buffers::window::{Segment, Window};
use crate::error::{Result, StrataError};
use crate::pool::slice::PoolSlice;

/// State shared between a pool-owned source buffer and every view derived
/// from it.
///
/// The slice reference is non-owning; slices outlive the buffers they
/// manage, and a dead reference simply means the buffer can no longer go
/// home and is dropped instead.
#[derive(Debug)]
pub(crate) struct BufferCore {
    /// Slice this buffer returns to; `None` for wrapped (unpooled) buffers
    owner: Option<Weak<PoolSlice>>,
    /// The full backing allocation
    segment: Arc<Segment>,
    /// Set once the source handle has been disposed
    free: AtomicBool,
}

/// A pooled byte buffer with standard cursor semantics
/// (`position <= limit <= capacity`) over a window of a heap segment.
///
/// Views created with [`slice_view`](PooledBuffer::slice_view),
/// [`duplicate`](PooledBuffer::duplicate),
/// [`as_read_only`](PooledBuffer::as_read_only) and
/// [`split`](PooledBuffer::split) share one atomic count with the source;
/// the source returns to its slice only when the last of them is disposed.
/// Dropping a handle disposes it, so a forgotten buffer still finds its way
/// back to the pool.
#[derive(Debug)]
pub struct PooledBuffer {
    window: Window,
    position: usize,
    limit: usize,
    read_only: bool,
    /// This handle has been disposed
    free: bool,
    /// This handle is the pool-owned source rather than a derived view
    is_source: bool,
    /// Number of live derived views, shared across the whole family
    share_count: Arc<AtomicU32>,
    core: Arc<BufferCore>,
}

impl PooledBuffer {
    /// Create a fresh pool-owned buffer of `buffer_size` bytes.
    ///
    /// The buffer starts in the in-pool state; [`mark_allocated`] readies it
    /// for a caller.
    pub(crate) fn pooled(buffer_size: usize, owner: Weak<PoolSlice>) -> PooledBuffer {
        let segment = Arc::new(Segment::alloc(buffer_size));
        PooledBuffer {
            window: Window::full(Arc::clone(&segment)),
            position: 0,
            limit: buffer_size,
            read_only: false,
            free: true,
            is_source: true,
            share_count: Arc::new(AtomicU32::new(0)),
            core: Arc::new(BufferCore {
                owner: Some(owner),
                segment,
                free: AtomicBool::new(true),
            }),
        }
    }

    /// Wrap existing bytes in an unpooled buffer; limit covers all of them
    pub fn wrap(bytes: Vec<u8>) -> PooledBuffer {
        let len = bytes.len();
        let segment = Arc::new(Segment::from_vec(bytes));
        PooledBuffer {
            window: Window::full(Arc::clone(&segment)),
            position: 0,
            limit: len,
            read_only: false,
            free: false,
            is_source: true,
            share_count: Arc::new(AtomicU32::new(0)),
            core: Arc::new(BufferCore {
                owner: None,
                segment,
                free: AtomicBool::new(false),
            }),
        }
    }

    /// The canonical empty buffer
    pub fn empty() -> PooledBuffer {
        PooledBuffer::wrap(Vec::new())
    }

    /// Rebuild the pool-owned source from its core for the trip back to the
    /// slice: full window, cleared cursors, in-pool state.
    fn restored(core: Arc<BufferCore>, share_count: Arc<AtomicU32>) -> PooledBuffer {
        let window = Window::full(Arc::clone(&core.segment));
        let limit = window.len();
        PooledBuffer {
            window,
            position: 0,
            limit,
            read_only: false,
            free: true,
            is_source: true,
            share_count,
            core,
        }
    }

    /// Transition out of the in-pool state after a poll or fresh allocation
    pub(crate) fn mark_allocated(&mut self) {
        self.free = false;
        self.core.free.store(false, Ordering::Release);
        self.position = 0;
        self.limit = self.window.len();
    }

    // ------------------------------------------------------------- Cursors

    /// Capacity of the visible window in bytes
    pub fn capacity(&self) -> usize {
        self.window.len()
    }

    /// Current read/write position
    pub fn position(&self) -> usize {
        self.position
    }

    /// Current limit
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes between position and limit
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    /// Whether this handle refuses writes
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether this handle has been disposed
    pub fn is_free(&self) -> bool {
        self.free
    }

    /// Number of live views sharing this buffer's backing memory
    pub fn share_count(&self) -> u32 {
        self.share_count.load(Ordering::Acquire)
    }

    /// Whether this buffer came from a pool slice
    pub fn is_pooled(&self) -> bool {
        self.core.owner.is_some()
    }

    /// Set the position; must not exceed the limit
    pub fn set_position(&mut self, position: usize) -> Result<()> {
        self.check_dispose()?;
        if position > self.limit {
            return Err(StrataError::invalid_parameter(
                "position",
                format!("position {} exceeds limit {}", position, self.limit),
            ));
        }
        self.position = position;
        Ok(())
    }

    /// Set the limit; must not exceed capacity. Position is clamped.
    pub fn set_limit(&mut self, limit: usize) -> Result<()> {
        self.check_dispose()?;
        if limit > self.capacity() {
            return Err(StrataError::invalid_parameter(
                "limit",
                format!("limit {} exceeds capacity {}", limit, self.capacity()),
            ));
        }
        self.limit = limit;
        self.position = self.position.min(limit);
        Ok(())
    }

    /// Reset position to zero and limit to capacity
    pub fn clear(&mut self) -> Result<()> {
        self.check_dispose()?;
        self.position = 0;
        self.limit = self.capacity();
        Ok(())
    }

    // ----------------------------------------------------------- Byte I/O

    /// Write `src` at the current position and advance it
    pub fn put_slice(&mut self, src: &[u8]) -> Result<()> {
        self.check_dispose()?;
        if self.read_only {
            return Err(StrataError::ReadOnly);
        }
        if src.len() > self.remaining() {
            return Err(StrataError::insufficient_space(src.len(), self.remaining()));
        }
        self.window.as_mut_slice()[self.position..self.position + src.len()].copy_from_slice(src);
        self.position += src.len();
        Ok(())
    }

    /// Read into `dst` from the current position and advance it
    pub fn get_slice(&mut self, dst: &mut [u8]) -> Result<()> {
        self.check_dispose()?;
        if dst.len() > self.remaining() {
            return Err(StrataError::insufficient_space(dst.len(), self.remaining()));
        }
        dst.copy_from_slice(&self.window.as_slice()[self.position..self.position + dst.len()]);
        self.position += dst.len();
        Ok(())
    }

    /// Write `src` at an absolute offset, ignoring the cursors
    pub fn write_at(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        self.check_dispose()?;
        if self.read_only {
            return Err(StrataError::ReadOnly);
        }
        if offset + src.len() > self.capacity() {
            return Err(StrataError::insufficient_space(
                src.len(),
                self.capacity().saturating_sub(offset),
            ));
        }
        self.window.as_mut_slice()[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Read from an absolute offset into `dst`, ignoring the cursors
    pub fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.check_dispose()?;
        if offset + dst.len() > self.capacity() {
            return Err(StrataError::insufficient_space(
                dst.len(),
                self.capacity().saturating_sub(offset),
            ));
        }
        dst.copy_from_slice(&self.window.as_slice()[offset..offset + dst.len()]);
        Ok(())
    }

    /// Bytes up to the limit
    pub fn as_slice(&self) -> &[u8] {
        &self.window.as_slice()[..self.limit]
    }

    /// Mutable bytes up to the limit
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.window.as_mut_slice()[..self.limit]
    }

    // -------------------------------------------------------------- Views

    /// View of `[position, limit)` with its own cursors starting at zero
    pub fn slice_view(&self) -> Result<PooledBuffer> {
        self.check_dispose()?;
        let window = self.window.narrowed(self.position, self.limit);
        let limit = window.len();
        Ok(self.derive_view(window, 0, limit, self.read_only))
    }

    /// View of the whole window with the current cursors
    pub fn duplicate(&self) -> Result<PooledBuffer> {
        self.check_dispose()?;
        Ok(self.derive_view(self.window.clone(), self.position, self.limit, self.read_only))
    }

    /// Read-only view of the whole window with the current cursors
    pub fn as_read_only(&self) -> Result<PooledBuffer> {
        self.check_dispose()?;
        Ok(self.derive_view(self.window.clone(), self.position, self.limit, true))
    }

    /// Split the buffer at `at`: this handle keeps `[0, at)`, the returned
    /// view covers `[at, capacity)`. Cursors carry over to whichever side
    /// they fall in.
    ///
    /// A source's window before any split is the whole segment; the return
    /// path rebuilds it from there when the family is fully disposed.
    pub fn split(&mut self, at: usize) -> Result<PooledBuffer> {
        self.check_dispose()?;
        if at > self.capacity() {
            return Err(StrataError::invalid_parameter(
                "at",
                format!("split position {} exceeds capacity {}", at, self.capacity()),
            ));
        }
        let old_position = self.position;
        let old_limit = self.limit;

        let left = self.window.narrowed(0, at);
        let right = self.window.narrowed(at, self.capacity());

        let (left_position, right_position) = if old_position < at {
            (old_position, 0)
        } else {
            (left.len(), old_position - at)
        };
        let (left_limit, right_limit) = if old_limit < at {
            (old_limit, 0)
        } else {
            (left.len(), old_limit - at)
        };

        self.window = left;
        self.position = left_position;
        self.limit = left_limit;

        Ok(self.derive_view(right, right_position, right_limit, self.read_only))
    }

    fn derive_view(
        &self,
        window: Window,
        position: usize,
        limit: usize,
        read_only: bool,
    ) -> PooledBuffer {
        self.share_count.fetch_add(1, Ordering::AcqRel);
        PooledBuffer {
            window,
            position,
            limit,
            read_only,
            free: false,
            is_source: false,
            share_count: Arc::clone(&self.share_count),
            core: Arc::clone(&self.core),
        }
    }

    // ----------------------------------------------------------- Disposal

    /// Release this handle. A no-op if already disposed. While sibling
    /// views are alive this only drops the share count; the last holder
    /// sends the source back to its slice. If the slice refuses (ring
    /// full), the backing segment is released when the last handle drops,
    /// including the halves of any split.
    pub fn dispose(&mut self) {
        if self.free {
            return;
        }
        self.free = true;
        if self.is_source {
            self.core.free.store(true, Ordering::Release);
        }
        // Hand our share to the siblings in one atomic step; a failed
        // update means the count was already zero and we are the last
        // holder.
        if self
            .share_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .is_ok()
        {
            return;
        }
        // Last holder; the source goes home once it has been disposed too.
        if self.is_source || self.core.free.load(Ordering::Acquire) {
            Self::return_source(&self.core, &self.share_count);
        }
    }

    fn return_source(core: &Arc<BufferCore>, share_count: &Arc<AtomicU32>) {
        let Some(owner) = core.owner.as_ref().and_then(Weak::upgrade) else {
            return;
        };
        let restored = PooledBuffer::restored(Arc::clone(core), Arc::clone(share_count));
        if !owner.offer(restored) {
            tracing::trace!(
                buffer_size = core.segment.len(),
                "slice refused a returning buffer, releasing it"
            );
        }
    }

    /// Size class this buffer belongs to, if it is pooled and the slice is
    /// still alive
    pub(crate) fn class_buffer_size(&self) -> Option<usize> {
        self.core
            .owner
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|slice| slice.buffer_size())
    }

    /// Whether `slice` owns this buffer
    pub(crate) fn is_owned_by(&self, slice: &PoolSlice) -> bool {
        self.is_source
            && self
                .core
                .owner
                .as_ref()
                .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), slice))
    }

    fn check_dispose(&self) -> Result<()> {
        if self.free {
            Err(StrataError::BufferDisposed)
        } else {
            Ok(())
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_and_cursors() {
        let mut buffer = PooledBuffer::wrap(vec![0u8; 64]);
        assert_eq!(buffer.capacity(), 64);
        assert_eq!(buffer.limit(), 64);
        assert_eq!(buffer.position(), 0);

        buffer.set_limit(10).unwrap();
        buffer.set_position(4).unwrap();
        assert_eq!(buffer.remaining(), 6);

        // Shrinking the limit clamps the position.
        buffer.set_limit(2).unwrap();
        assert_eq!(buffer.position(), 2);

        assert!(buffer.set_position(50).is_err());
        buffer.clear().unwrap();
        assert_eq!(buffer.limit(), 64);
    }

    #[test]
    fn test_put_get_round_trip() {
        let mut buffer = PooledBuffer::wrap(vec![0u8; 32]);
        buffer.put_slice(b"hello").unwrap();
        assert_eq!(buffer.position(), 5);

        buffer.set_position(0).unwrap();
        let mut read = [0u8; 5];
        buffer.get_slice(&mut read).unwrap();
        assert_eq!(&read, b"hello");
    }

    #[test]
    fn test_put_past_limit_fails() {
        let mut buffer = PooledBuffer::wrap(vec![0u8; 8]);
        buffer.set_limit(4).unwrap();
        assert!(matches!(
            buffer.put_slice(&[0u8; 5]),
            Err(StrataError::InsufficientSpace { .. })
        ));
    }

    #[test]
    fn test_read_only_view_refuses_writes() {
        let mut buffer = PooledBuffer::wrap(vec![0u8; 16]);
        buffer.put_slice(&[7u8; 4]).unwrap();

        let mut view = buffer.as_read_only().unwrap();
        assert!(matches!(view.put_slice(&[1]), Err(StrataError::ReadOnly)));

        // Reads still work and see the source's bytes.
        view.set_position(0).unwrap();
        let mut read = [0u8; 4];
        view.get_slice(&mut read).unwrap();
        assert_eq!(read, [7u8; 4]);
    }

    #[test]
    fn test_views_share_count() {
        let buffer = PooledBuffer::wrap(vec![0u8; 16]);
        assert_eq!(buffer.share_count(), 0);

        let view_a = buffer.duplicate().unwrap();
        let view_b = buffer.slice_view().unwrap();
        assert_eq!(buffer.share_count(), 2);

        drop(view_a);
        drop(view_b);
        assert_eq!(buffer.share_count(), 0);
    }

    #[test]
    fn test_slice_view_window() {
        let mut buffer = PooledBuffer::wrap((0u8..16).collect());
        buffer.set_position(4).unwrap();
        buffer.set_limit(12).unwrap();

        let view = buffer.slice_view().unwrap();
        assert_eq!(view.capacity(), 8);
        assert_eq!(view.position(), 0);
        assert_eq!(view.as_slice()[0], 4);
    }

    #[test]
    fn test_split_cursor_propagation() {
        // Position before the split point, limit after it.
        let mut buffer = PooledBuffer::wrap(vec![0u8; 100]);
        buffer.set_limit(80).unwrap();
        buffer.set_position(10).unwrap();

        let right = buffer.split(40).unwrap();
        assert_eq!(buffer.capacity(), 40);
        assert_eq!(buffer.position(), 10);
        assert_eq!(buffer.limit(), 40);
        assert_eq!(right.capacity(), 60);
        assert_eq!(right.position(), 0);
        assert_eq!(right.limit(), 40);
    }

    #[test]
    fn test_split_with_cursors_past_split_point() {
        let mut buffer = PooledBuffer::wrap(vec![0u8; 100]);
        buffer.set_position(60).unwrap();

        let right = buffer.split(40).unwrap();
        assert_eq!(buffer.position(), 40);
        assert_eq!(right.position(), 20);
        assert_eq!(right.limit(), 60);
    }

    #[test]
    fn test_split_halves_share_memory() {
        let mut buffer = PooledBuffer::wrap(vec![0u8; 8]);
        let mut right = buffer.split(4).unwrap();

        buffer.write_at(0, &[1, 2, 3, 4]).unwrap();
        right.write_at(0, &[5, 6, 7, 8]).unwrap();

        let mut all = [0u8; 4];
        right.read_at(0, &mut all).unwrap();
        assert_eq!(all, [5, 6, 7, 8]);
        buffer.read_at(0, &mut all).unwrap();
        assert_eq!(all, [1, 2, 3, 4]);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let mut buffer = PooledBuffer::wrap(vec![0u8; 8]);
        buffer.dispose();
        assert!(buffer.is_free());
        buffer.dispose();
        assert!(buffer.is_free());
    }

    #[test]
    fn test_ops_fail_after_dispose() {
        let mut buffer = PooledBuffer::wrap(vec![0u8; 8]);
        buffer.dispose();

        assert!(matches!(buffer.put_slice(&[1]), Err(StrataError::BufferDisposed)));
        assert!(matches!(buffer.duplicate(), Err(StrataError::BufferDisposed)));
        assert!(matches!(buffer.split(2), Err(StrataError::BufferDisposed)));
        assert!(matches!(buffer.clear(), Err(StrataError::BufferDisposed)));
    }

    #[test]
    fn test_empty_buffer() {
        let empty = PooledBuffer::empty();
        assert_eq!(empty.capacity(), 0);
        assert_eq!(empty.limit(), 0);
        assert!(!empty.is_pooled());
    }
}
