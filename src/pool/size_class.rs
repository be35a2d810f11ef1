//! A size class: one buffer size striped across independent ring slices

use std::sync::Arc;

use crate::buffers::pooled::PooledBuffer;
use crate::error::Result;
use crate::pool::slice::PoolSlice;
use crate::probe::ProbeSet;

/// A pool of buffers of one fixed size.
///
/// Allocation requests are striped across the slices at random, so no slice
/// turns into a hotspot and no thread develops an affinity that would strand
/// buffers crossing threads.
#[derive(Debug)]
pub struct Pool {
    buffer_size: usize,
    slices: Box<[Arc<PoolSlice>]>,
}

impl Pool {
    /// Build a size class with `slice_count` slices sharing `pool_budget`
    /// bytes.
    pub(crate) fn new(
        buffer_size: usize,
        pool_budget: u64,
        slice_count: usize,
        skip_buffer_wait_loop: bool,
        probes: &Arc<ProbeSet>,
    ) -> Result<Pool> {
        let slice_budget = pool_budget / slice_count as u64;
        let slices = (0..slice_count)
            .map(|_| {
                PoolSlice::new(
                    buffer_size,
                    slice_budget,
                    skip_buffer_wait_loop,
                    Arc::clone(probes),
                )
            })
            .collect::<Result<Vec<_>>>()?
            .into_boxed_slice();

        Ok(Pool {
            buffer_size,
            slices,
        })
    }

    /// Bytes per buffer in this class
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Snapshot of the slices in this class
    pub fn slices(&self) -> Vec<Arc<PoolSlice>> {
        self.slices.to_vec()
    }

    /// Total buffers currently cached across the slices
    pub fn elements_count(&self) -> usize {
        self.slices.iter().map(|slice| slice.elements_count()).sum()
    }

    /// Total bytes currently cached across the slices
    pub fn size(&self) -> u64 {
        self.elements_count() as u64 * self.buffer_size as u64
    }

    /// Allocate a buffer of this class's size.
    ///
    /// Polls a randomly chosen slice; when its ring is empty, a fresh
    /// buffer is created instead, so an exhausted pool degrades to plain
    /// allocation rather than blocking.
    pub fn allocate(&self) -> PooledBuffer {
        let slice = &self.slices[fastrand::usize(..self.slices.len())];
        let mut buffer = match slice.poll() {
            Some(buffer) => buffer,
            None => slice.allocate(),
        };
        buffer.mark_allocated();
        buffer
    }
}
