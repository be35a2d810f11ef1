//! Monitoring probes for buffer allocation and release events

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Callback surface notified on buffer lifecycle events.
///
/// The pool variants report ring cache hits (a buffer handed out of, or
/// returned into, a slice ring); by default they forward to the plain
/// allocated/released events.
pub trait MemoryProbe: Send + Sync {
    /// A fresh buffer of `buffer_size` bytes was allocated
    fn buffer_allocated(&self, buffer_size: usize);

    /// A buffer of `buffer_size` bytes was released
    fn buffer_released(&self, buffer_size: usize);

    /// A pooled buffer was handed out of a slice ring
    fn buffer_allocated_from_pool(&self, buffer_size: usize) {
        self.buffer_allocated(buffer_size);
    }

    /// A pooled buffer was returned into a slice ring
    fn buffer_released_to_pool(&self, buffer_size: usize) {
        self.buffer_released(buffer_size);
    }
}

/// Immutable set of probes shared by a manager and its slices.
///
/// Probes are registered at construction time so notification is a plain
/// slice walk with no synchronization on the poll/offer path.
#[derive(Default)]
pub struct ProbeSet {
    probes: Box<[Arc<dyn MemoryProbe>]>,
}

impl ProbeSet {
    /// Create a probe set from registered probes
    pub fn new(probes: Vec<Arc<dyn MemoryProbe>>) -> Self {
        Self {
            probes: probes.into_boxed_slice(),
        }
    }

    /// Create an empty probe set
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of registered probes
    pub fn len(&self) -> usize {
        self.probes.len()
    }

    /// Check whether any probes are registered
    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub(crate) fn notify_allocated(&self, buffer_size: usize) {
        for probe in self.probes.iter() {
            probe.buffer_allocated(buffer_size);
        }
    }

    pub(crate) fn notify_released(&self, buffer_size: usize) {
        for probe in self.probes.iter() {
            probe.buffer_released(buffer_size);
        }
    }

    pub(crate) fn notify_allocated_from_pool(&self, buffer_size: usize) {
        for probe in self.probes.iter() {
            probe.buffer_allocated_from_pool(buffer_size);
        }
    }

    pub(crate) fn notify_released_to_pool(&self, buffer_size: usize) {
        for probe in self.probes.iter() {
            probe.buffer_released_to_pool(buffer_size);
        }
    }
}

impl std::fmt::Debug for ProbeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeSet")
            .field("probes", &self.probes.len())
            .finish()
    }
}

/// Point-in-time view of [`PoolStatsProbe`] counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatsSnapshot {
    /// Fresh buffers allocated outside the rings
    pub fresh_allocations: u64,
    /// Buffers handed out of a slice ring
    pub pool_hits: u64,
    /// Buffers returned into a slice ring
    pub pool_returns: u64,
    /// Buffers released without returning to a ring
    pub released: u64,
    /// Bytes currently held by callers
    pub bytes_in_use: usize,
    /// Peak bytes held by callers
    pub peak_bytes_in_use: usize,
}

/// Thread-safe statistics probe with atomic counters
#[derive(Debug, Default)]
pub struct PoolStatsProbe {
    fresh_allocations: AtomicU64,
    pool_hits: AtomicU64,
    pool_returns: AtomicU64,
    released: AtomicU64,
    bytes_in_use: AtomicUsize,
    peak_bytes_in_use: AtomicUsize,
}

impl PoolStatsProbe {
    /// Create a statistics probe with zeroed counters
    pub fn new() -> Self {
        Default::default()
    }

    /// Get a snapshot of the current counters
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            fresh_allocations: self.fresh_allocations.load(Ordering::Relaxed),
            pool_hits: self.pool_hits.load(Ordering::Relaxed),
            pool_returns: self.pool_returns.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            bytes_in_use: self.bytes_in_use.load(Ordering::Relaxed),
            peak_bytes_in_use: self.peak_bytes_in_use.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.fresh_allocations.store(0, Ordering::Relaxed);
        self.pool_hits.store(0, Ordering::Relaxed);
        self.pool_returns.store(0, Ordering::Relaxed);
        self.released.store(0, Ordering::Relaxed);
        self.bytes_in_use.store(0, Ordering::Relaxed);
        self.peak_bytes_in_use.store(0, Ordering::Relaxed);
    }

    fn track_outstanding(&self, buffer_size: usize) {
        let new_in_use = self.bytes_in_use.fetch_add(buffer_size, Ordering::Relaxed) + buffer_size;
        let mut peak = self.peak_bytes_in_use.load(Ordering::Relaxed);
        while new_in_use > peak {
            match self.peak_bytes_in_use.compare_exchange_weak(
                peak,
                new_in_use,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => peak = current,
            }
        }
    }
}

impl MemoryProbe for PoolStatsProbe {
    fn buffer_allocated(&self, buffer_size: usize) {
        self.fresh_allocations.fetch_add(1, Ordering::Relaxed);
        self.track_outstanding(buffer_size);
    }

    fn buffer_released(&self, buffer_size: usize) {
        self.released.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .bytes_in_use
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(buffer_size))
            });
    }

    fn buffer_allocated_from_pool(&self, buffer_size: usize) {
        self.pool_hits.fetch_add(1, Ordering::Relaxed);
        self.track_outstanding(buffer_size);
    }

    fn buffer_released_to_pool(&self, buffer_size: usize) {
        self.pool_returns.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .bytes_in_use
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(buffer_size))
            });
    }
}
