//! The allocation result type: a single pooled buffer or a composite

use crate::buffers::composite::CompositeBuffer;
use crate::buffers::pooled::PooledBuffer;
use crate::error::Result;

/// A byte buffer handed out by the manager.
///
/// Requests that fit the largest size class come back as
/// [`Buffer::Pooled`]; larger requests are assembled from multiple pool
/// segments as [`Buffer::Composite`]. Both shapes share the cursor and byte
/// operations below.
#[derive(Debug)]
pub enum Buffer {
    /// A single buffer from one size class
    Pooled(PooledBuffer),
    /// Multiple pooled segments behind one logical cursor
    Composite(CompositeBuffer),
}

impl Buffer {
    /// Capacity in bytes
    pub fn capacity(&self) -> usize {
        match self {
            Buffer::Pooled(inner) => inner.capacity(),
            Buffer::Composite(inner) => inner.capacity(),
        }
    }

    /// Current read/write position
    pub fn position(&self) -> usize {
        match self {
            Buffer::Pooled(inner) => inner.position(),
            Buffer::Composite(inner) => inner.position(),
        }
    }

    /// Current limit
    pub fn limit(&self) -> usize {
        match self {
            Buffer::Pooled(inner) => inner.limit(),
            Buffer::Composite(inner) => inner.limit(),
        }
    }

    /// Bytes between position and limit
    pub fn remaining(&self) -> usize {
        match self {
            Buffer::Pooled(inner) => inner.remaining(),
            Buffer::Composite(inner) => inner.remaining(),
        }
    }

    /// Set the position; must not exceed the limit
    pub fn set_position(&mut self, position: usize) -> Result<()> {
        match self {
            Buffer::Pooled(inner) => inner.set_position(position),
            Buffer::Composite(inner) => inner.set_position(position),
        }
    }

    /// Set the limit; must not exceed capacity. Position is clamped.
    pub fn set_limit(&mut self, limit: usize) -> Result<()> {
        match self {
            Buffer::Pooled(inner) => inner.set_limit(limit),
            Buffer::Composite(inner) => inner.set_limit(limit),
        }
    }

    /// Write `src` at the current position and advance it
    pub fn put_slice(&mut self, src: &[u8]) -> Result<()> {
        match self {
            Buffer::Pooled(inner) => inner.put_slice(src),
            Buffer::Composite(inner) => inner.put_slice(src),
        }
    }

    /// Read into `dst` from the current position and advance it
    pub fn get_slice(&mut self, dst: &mut [u8]) -> Result<()> {
        match self {
            Buffer::Pooled(inner) => inner.get_slice(dst),
            Buffer::Composite(inner) => inner.get_slice(dst),
        }
    }

    /// Write `src` at an absolute offset, ignoring the cursors
    pub fn write_at(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        match self {
            Buffer::Pooled(inner) => inner.write_at(offset, src),
            Buffer::Composite(inner) => inner.write_at(offset, src),
        }
    }

    /// Read from an absolute offset into `dst`, ignoring the cursors
    pub fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        match self {
            Buffer::Pooled(inner) => inner.read_at(offset, dst),
            Buffer::Composite(inner) => inner.read_at(offset, dst),
        }
    }

    /// Release the buffer toward its pool; a no-op if already disposed
    pub fn dispose(&mut self) {
        match self {
            Buffer::Pooled(inner) => inner.dispose(),
            Buffer::Composite(inner) => inner.dispose(),
        }
    }

    /// Whether this buffer has been disposed
    pub fn is_free(&self) -> bool {
        match self {
            Buffer::Pooled(inner) => inner.is_free(),
            Buffer::Composite(inner) => inner.is_free(),
        }
    }

    /// Whether this is a composite of multiple segments
    pub fn is_composite(&self) -> bool {
        matches!(self, Buffer::Composite(_))
    }

    /// Borrow the pooled shape, if this is one
    pub fn as_pooled(&self) -> Option<&PooledBuffer> {
        match self {
            Buffer::Pooled(inner) => Some(inner),
            Buffer::Composite(_) => None,
        }
    }

    /// Borrow the composite shape, if this is one
    pub fn as_composite(&self) -> Option<&CompositeBuffer> {
        match self {
            Buffer::Pooled(_) => None,
            Buffer::Composite(inner) => Some(inner),
        }
    }
}

impl From<PooledBuffer> for Buffer {
    fn from(inner: PooledBuffer) -> Buffer {
        Buffer::Pooled(inner)
    }
}

impl From<CompositeBuffer> for Buffer {
    fn from(inner: CompositeBuffer) -> Buffer {
        Buffer::Composite(inner)
    }
}
