//! Composite buffers assembled from multiple pooled segments

use crate::buffers::pooled::PooledBuffer;
use crate::error::{Result, StrataError};

/// A logical byte buffer backed by an ordered list of pooled segments.
///
/// Used for requests larger than the biggest size class; the capacity is
/// the sum of the segment capacities and byte operations span segment
/// boundaries transparently. Disposing the composite disposes every
/// segment.
#[derive(Debug)]
pub struct CompositeBuffer {
    segments: Vec<PooledBuffer>,
    position: usize,
    limit: usize,
    appendable: bool,
    free: bool,
}

impl CompositeBuffer {
    /// Create an empty, appendable composite
    pub fn new() -> CompositeBuffer {
        CompositeBuffer {
            segments: Vec::new(),
            position: 0,
            limit: 0,
            appendable: true,
            free: false,
        }
    }

    /// Total capacity across all segments
    pub fn capacity(&self) -> usize {
        self.segments.iter().map(|segment| segment.capacity()).sum()
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

    /// Number of backing segments
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Capacities of the backing segments, in order
    pub fn segment_capacities(&self) -> Vec<usize> {
        self.segments.iter().map(|segment| segment.capacity()).collect()
    }

    /// Whether further segments may be appended
    pub fn is_appendable(&self) -> bool {
        self.appendable
    }

    /// Allow or forbid appending further segments
    pub fn set_appendable(&mut self, appendable: bool) {
        self.appendable = appendable;
    }

    /// Whether this composite has been disposed
    pub fn is_free(&self) -> bool {
        self.free
    }

    /// Append a pooled segment; capacity and limit both grow by its
    /// capacity
    pub fn append(&mut self, segment: PooledBuffer) -> Result<()> {
        self.check_dispose()?;
        if !self.appendable {
            return Err(StrataError::invalid_parameter(
                "segment",
                "composite buffer is not appendable",
            ));
        }
        self.limit += segment.capacity();
        self.segments.push(segment);
        Ok(())
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

    /// Dispose trailing segments that lie wholly past the limit
    pub fn trim(&mut self) -> Result<()> {
        self.check_dispose()?;
        let mut covered = 0;
        let mut keep = 0;
        for segment in &self.segments {
            if covered >= self.limit && keep > 0 {
                break;
            }
            covered += segment.capacity();
            keep += 1;
        }
        for mut dropped in self.segments.drain(keep..) {
            dropped.dispose();
        }
        Ok(())
    }

    /// Write `src` at the current position, crossing segment boundaries as
    /// needed, and advance the position
    pub fn put_slice(&mut self, src: &[u8]) -> Result<()> {
        self.check_dispose()?;
        if src.len() > self.remaining() {
            return Err(StrataError::insufficient_space(src.len(), self.remaining()));
        }
        self.write_at(self.position, src)?;
        self.position += src.len();
        Ok(())
    }

    /// Read into `dst` from the current position and advance it
    pub fn get_slice(&mut self, dst: &mut [u8]) -> Result<()> {
        self.check_dispose()?;
        if dst.len() > self.remaining() {
            return Err(StrataError::insufficient_space(dst.len(), self.remaining()));
        }
        self.read_at(self.position, dst)?;
        self.position += dst.len();
        Ok(())
    }

    /// Write `src` at an absolute offset, ignoring the cursors
    pub fn write_at(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        self.check_dispose()?;
        if offset + src.len() > self.capacity() {
            return Err(StrataError::insufficient_space(
                src.len(),
                self.capacity().saturating_sub(offset),
            ));
        }
        let mut remaining = src;
        let mut offset = offset;
        for segment in &mut self.segments {
            if remaining.is_empty() {
                break;
            }
            let capacity = segment.capacity();
            if offset >= capacity {
                offset -= capacity;
                continue;
            }
            let take = remaining.len().min(capacity - offset);
            segment.write_at(offset, &remaining[..take])?;
            remaining = &remaining[take..];
            offset = 0;
        }
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
        let mut filled = 0;
        let mut offset = offset;
        for segment in &self.segments {
            if filled == dst.len() {
                break;
            }
            let capacity = segment.capacity();
            if offset >= capacity {
                offset -= capacity;
                continue;
            }
            let take = (dst.len() - filled).min(capacity - offset);
            segment.read_at(offset, &mut dst[filled..filled + take])?;
            filled += take;
            offset = 0;
        }
        Ok(())
    }

    /// Release every segment back toward its pool. A no-op if already
    /// disposed.
    pub fn dispose(&mut self) {
        if self.free {
            return;
        }
        self.free = true;
        for mut segment in self.segments.drain(..) {
            segment.dispose();
        }
        self.position = 0;
        self.limit = 0;
    }

    fn check_dispose(&self) -> Result<()> {
        if self.free {
            Err(StrataError::BufferDisposed)
        } else {
            Ok(())
        }
    }
}

impl Default for CompositeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CompositeBuffer {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(len: usize) -> PooledBuffer {
        PooledBuffer::wrap(vec![0u8; len])
    }

    #[test]
    fn test_append_grows_capacity_and_limit() {
        let mut composite = CompositeBuffer::new();
        composite.append(segment(64)).unwrap();
        composite.append(segment(64)).unwrap();

        assert_eq!(composite.capacity(), 128);
        assert_eq!(composite.limit(), 128);
        assert_eq!(composite.segment_count(), 2);
    }

    #[test]
    fn test_append_respects_appendable_flag() {
        let mut composite = CompositeBuffer::new();
        composite.set_appendable(false);
        assert!(composite.append(segment(64)).is_err());
    }

    #[test]
    fn test_io_across_segment_boundary() {
        let mut composite = CompositeBuffer::new();
        composite.append(segment(8)).unwrap();
        composite.append(segment(8)).unwrap();

        let payload: Vec<u8> = (0..12).collect();
        composite.put_slice(&payload).unwrap();
        assert_eq!(composite.position(), 12);

        composite.set_position(0).unwrap();
        let mut read = vec![0u8; 12];
        composite.get_slice(&mut read).unwrap();
        assert_eq!(read, payload);
    }

    #[test]
    fn test_write_at_straddles_three_segments() {
        let mut composite = CompositeBuffer::new();
        for _ in 0..3 {
            composite.append(segment(4)).unwrap();
        }

        composite.write_at(2, &[9; 8]).unwrap();
        let mut read = vec![0u8; 12];
        composite.read_at(0, &mut read).unwrap();
        assert_eq!(read, [0, 0, 9, 9, 9, 9, 9, 9, 9, 9, 0, 0]);
    }

    #[test]
    fn test_trim_drops_segments_past_limit() {
        let mut composite = CompositeBuffer::new();
        for _ in 0..4 {
            composite.append(segment(16)).unwrap();
        }

        composite.set_limit(20).unwrap();
        composite.trim().unwrap();
        // 20 bytes need two 16-byte segments.
        assert_eq!(composite.segment_count(), 2);
        assert_eq!(composite.capacity(), 32);
    }

    #[test]
    fn test_dispose_releases_segments_once() {
        let mut composite = CompositeBuffer::new();
        composite.append(segment(16)).unwrap();
        composite.dispose();
        assert!(composite.is_free());
        assert!(composite.put_slice(&[1]).is_err());

        // Second dispose is a no-op.
        composite.dispose();
        assert_eq!(composite.segment_count(), 0);
    }
}
