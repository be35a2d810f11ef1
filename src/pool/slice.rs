//! Lock-free bounded MPMC ring of fixed-size pooled buffers

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use crate::buffers::pooled::PooledBuffer;
use crate::error::{Result, StrataError};
use crate::pool::padded::{PaddedAtomicU32, PaddedSlotArray};
use crate::probe::ProbeSet;

/// Step between logically adjacent slots; spreads neighbouring ring
/// positions across distant cache lines
pub const STRIDE: u32 = 16;

/// Lower 30 bits of an index: the physical slot number
const MASK: u32 = 0x3FFF_FFFF;

/// Bit 30: toggled on every pass over an array, and selects which of the
/// two arrays an index addresses
pub(crate) const WRAP_BIT: u32 = 0x4000_0000;

/// One independent ring inside a size class.
///
/// The ring can address at most 2^30 - 1 slots; bit 30 of each packed index
/// records whether that pointer has wrapped, which is what distinguishes a
/// full ring from an empty one when the poll and offer positions line up.
/// The wrap bit also picks one of two backing arrays, so a producer and a
/// consumer meeting at the same slot number are operating on different
/// arrays until the bit flips.
pub struct PoolSlice {
    /// Current array while the wrap bit is clear
    array_a: PaddedSlotArray<PooledBuffer>,
    /// Current array while the wrap bit is set
    array_b: PaddedSlotArray<PooledBuffer>,
    poll_idx: PaddedAtomicU32,
    offer_idx: PaddedAtomicU32,
    /// Slot count; a multiple of STRIDE below 2^30
    max_pool_size: u32,
    /// Bytes per buffer in this slice
    buffer_size: usize,
    /// Fail fast on a transiently empty or occupied slot instead of
    /// spinning for the in-flight counterpart
    skip_buffer_wait_loop: bool,
    probes: Arc<ProbeSet>,
    me: Weak<PoolSlice>,
}

impl PoolSlice {
    /// Build a slice sized for `slice_budget` bytes of `buffer_size`
    /// buffers and pre-populate it to capacity.
    pub(crate) fn new(
        buffer_size: usize,
        slice_budget: u64,
        skip_buffer_wait_loop: bool,
        probes: Arc<ProbeSet>,
    ) -> Result<Arc<PoolSlice>> {
        let initial_size = slice_budget / buffer_size as u64;

        // Round up to the nearest multiple of STRIDE; slots are visited at
        // strided offsets and the walk assumes a whole number of columns.
        let max_pool_size = (initial_size + (STRIDE as u64 - 1)) & !(STRIDE as u64 - 1);
        if max_pool_size == 0 {
            return Err(StrataError::invalid_parameter(
                "slice_budget",
                format!("budget {} holds no {}-byte buffers", slice_budget, buffer_size),
            ));
        }
        if max_pool_size >= WRAP_BIT as u64 {
            return Err(StrataError::CapacityOverflow {
                slots: max_pool_size,
            });
        }
        let max_pool_size = max_pool_size as u32;

        let slice = Arc::new_cyclic(|me| PoolSlice {
            array_a: PaddedSlotArray::new(max_pool_size as usize),
            array_b: PaddedSlotArray::new(max_pool_size as usize),
            poll_idx: PaddedAtomicU32::new(0),
            offer_idx: PaddedAtomicU32::new(WRAP_BIT),
            max_pool_size,
            buffer_size,
            skip_buffer_wait_loop,
            probes,
            me: me.clone(),
        });

        // Start the ring full on array A.
        for index in 0..max_pool_size as usize {
            let _ = slice.array_a.try_put(index, Box::new(slice.allocate()));
        }

        Ok(slice)
    }

    /// Bytes per buffer in this slice
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Slot capacity of this slice
    pub fn max_pool_size(&self) -> usize {
        self.max_pool_size as usize
    }

    /// Remove and return one buffer, or `None` if the ring looks empty
    pub fn poll(&self) -> Option<PooledBuffer> {
        let claimed = loop {
            let poll_idx = self.poll_idx.load(Ordering::Acquire);
            let offer_idx = self.offer_idx.load(Ordering::Acquire);

            // Weak empty check, may see false positives.
            if poll_idx == offer_idx {
                return None;
            }
            let next = self.next_index(poll_idx);
            if self
                .poll_idx
                .compare_exchange(poll_idx, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break poll_idx;
            }
        };

        let array = self.array_for(claimed);
        let slot = unmask(claimed) as usize;

        let mut buffer = array.take(slot);
        if buffer.is_none() {
            if self.skip_buffer_wait_loop {
                return None;
            }
            // The offer that claimed this slot has not published yet; give
            // it time to complete.
            loop {
                std::thread::yield_now();
                buffer = array.take(slot);
                if buffer.is_some() {
                    break;
                }
            }
        }

        self.probes.notify_allocated_from_pool(self.buffer_size);
        buffer.map(|boxed| *boxed)
    }

    /// Insert `buffer`; `false` if it is not owned by this slice or the
    /// ring looks full
    pub fn offer(&self, buffer: PooledBuffer) -> bool {
        if !buffer.is_owned_by(self) {
            return false;
        }

        let claimed = loop {
            let offer_idx = self.offer_idx.load(Ordering::Acquire);
            let poll_idx = self.poll_idx.load(Ordering::Acquire);

            // Weak full check, may see false positives.
            if (poll_idx ^ offer_idx) == WRAP_BIT {
                return false;
            }
            let next = self.next_index(offer_idx);
            if self
                .offer_idx
                .compare_exchange(offer_idx, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break offer_idx;
            }
        };

        let array = self.array_for(claimed);
        let slot = unmask(claimed) as usize;

        let mut boxed = Box::new(buffer);
        if self.skip_buffer_wait_loop {
            if array.try_put(slot, boxed).is_err() {
                return false;
            }
        } else {
            // The poll that claimed this slot has not emptied it yet; give
            // it time to complete.
            loop {
                match array.try_put(slot, boxed) {
                    Ok(()) => break,
                    Err(back) => {
                        boxed = back;
                        std::thread::yield_now();
                    }
                }
            }
        }

        self.probes.notify_released_to_pool(self.buffer_size);
        true
    }

    /// Approximate number of buffers in the ring
    pub fn elements_count(&self) -> usize {
        self.elements_count_for(
            self.poll_idx.load(Ordering::Acquire),
            self.offer_idx.load(Ordering::Acquire),
        )
    }

    /// Approximate bytes held by the ring
    pub fn size(&self) -> u64 {
        self.elements_count() as u64 * self.buffer_size as u64
    }

    /// Drain the ring, releasing every buffer in it
    pub fn clear(&self) {
        while self.poll().is_some() {}
    }

    /// Create a fresh pool-owned buffer outside the ring
    pub(crate) fn allocate(&self) -> PooledBuffer {
        let buffer = PooledBuffer::pooled(self.buffer_size, self.me.clone());
        self.probes.notify_allocated(self.buffer_size);
        buffer
    }

    // ----------------------------------------------------- Index plumbing

    /// De-virtualized index difference; when the wrap bits differ the raw
    /// difference is negative and gets corrected by the slot count.
    fn elements_count_for(&self, ridx: u32, widx: u32) -> usize {
        let wrap_correction =
            (self.max_pool_size & fill_ones_right((ridx ^ widx) & WRAP_BIT)) as i64;
        (self.unstride(unmask(widx)) as i64 - self.unstride(unmask(ridx)) as i64 + wrap_correction)
            as usize
    }

    /// Advance a packed index by one logical step.
    ///
    /// Walks the array in STRIDE-spaced columns; when a column runs off the
    /// end the walk continues at the next small offset, and once every
    /// offset is exhausted the wrap bit flips and the index restarts at
    /// zero on the other array.
    fn next_index(&self, current: u32) -> u32 {
        let array_index = unmask(current);
        if array_index + STRIDE < self.max_pool_size {
            current + STRIDE
        } else {
            let offset = array_index + STRIDE + 1 - self.max_pool_size;
            if offset == STRIDE {
                WRAP_BIT ^ (current & WRAP_BIT)
            } else {
                offset | (current & WRAP_BIT)
            }
        }
    }

    /// Logical step count of a physical slot index
    fn unstride(&self, index: u32) -> u32 {
        index / STRIDE + (index % STRIDE) * (self.max_pool_size / STRIDE)
    }

    fn array_for(&self, index: u32) -> &PaddedSlotArray<PooledBuffer> {
        if index & WRAP_BIT == 0 {
            &self.array_a
        } else {
            &self.array_b
        }
    }

    #[cfg(test)]
    fn indices(&self) -> (u32, u32) {
        (
            self.poll_idx.load(Ordering::Acquire),
            self.offer_idx.load(Ordering::Acquire),
        )
    }

    #[cfg(test)]
    fn physical_count(&self) -> usize {
        self.array_a.occupied() + self.array_b.occupied()
    }
}

/// Physical slot number of a packed index
pub(crate) fn unmask(value: u32) -> u32 {
    value & MASK
}

/// Propagate the highest one bit to every bit below it, giving an all-ones
/// mask for any non-zero input; used to apply the wrap correction without a
/// branch
fn fill_ones_right(mut value: u32) -> u32 {
    value |= value >> 1;
    value |= value >> 2;
    value |= value >> 4;
    value |= value >> 8;
    value |= value >> 16;
    value
}

impl std::fmt::Debug for PoolSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ridx = self.poll_idx.load(Ordering::Acquire);
        let widx = self.offer_idx.load(Ordering::Acquire);
        f.debug_struct("PoolSlice")
            .field("buffer_size", &self.buffer_size)
            .field("elements", &self.elements_count_for(ridx, widx))
            .field("poll_index", &unmask(ridx))
            .field("poll_wrap", &((ridx & WRAP_BIT) != 0))
            .field("offer_index", &unmask(widx))
            .field("offer_wrap", &((widx & WRAP_BIT) != 0))
            .field("max_pool_size", &self.max_pool_size)
            .finish()
    }
}
