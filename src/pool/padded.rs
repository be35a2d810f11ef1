//! Cache-line padded atomics for the highly contended ring fields

use std::marker::PhantomData;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

/// Pointers per 64-byte cache line, used to size the guard lanes
const GUARD_LANE: usize = 64 / std::mem::size_of::<*mut ()>();

/// A 32-bit atomic counter alone on its cache line.
///
/// The poll and offer indices of a slice are the hottest words in the whole
/// pool; keeping each on a private line stops one side's CAS traffic from
/// invalidating the other's.
#[derive(Debug)]
#[repr(C, align(64))]
pub(crate) struct PaddedAtomicU32 {
    value: AtomicU32,
}

impl PaddedAtomicU32 {
    pub fn new(value: u32) -> Self {
        Self {
            value: AtomicU32::new(value),
        }
    }

    pub fn load(&self, order: Ordering) -> u32 {
        self.value.load(order)
    }

    pub fn compare_exchange(
        &self,
        current: u32,
        new: u32,
        success: Ordering,
        failure: Ordering,
    ) -> std::result::Result<u32, u32> {
        self.value.compare_exchange(current, new, success, failure)
    }
}

/// A fixed-length array of atomic slots, each holding one boxed value or
/// nothing.
///
/// One full lane of unused slots pads each end of the allocation, so a hot
/// boundary slot never shares a cache line with whatever the allocator
/// placed next to the array. The array owns its occupants; anything still
/// present when it drops is released.
pub(crate) struct PaddedSlotArray<T> {
    slots: Box<[AtomicPtr<T>]>,
    /// The array owns its boxed occupants
    _owns: PhantomData<T>,
}

impl<T> PaddedSlotArray<T> {
    pub fn new(len: usize) -> Self {
        let slots = (0..len + 2 * GUARD_LANE)
            .map(|_| AtomicPtr::new(std::ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            _owns: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len() - 2 * GUARD_LANE
    }

    /// Atomically take the occupant of slot `index`, leaving it empty
    pub fn take(&self, index: usize) -> Option<Box<T>> {
        let ptr = self.slots[index + GUARD_LANE].swap(std::ptr::null_mut(), Ordering::AcqRel);
        if ptr.is_null() {
            None
        } else {
            // The pointer came from Box::into_raw in try_put/prime and was
            // claimed by exactly this swap.
            Some(unsafe { Box::from_raw(ptr) })
        }
    }

    /// Atomically store `value` into slot `index` if it is empty.
    ///
    /// On contention the value is handed back so the caller can retry or
    /// drop it.
    pub fn try_put(&self, index: usize, value: Box<T>) -> std::result::Result<(), Box<T>> {
        let ptr = Box::into_raw(value);
        match self.slots[index + GUARD_LANE].compare_exchange(
            std::ptr::null_mut(),
            ptr,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            // Reclaim the box we just leaked into the failed CAS.
            Err(_) => Err(unsafe { Box::from_raw(ptr) }),
        }
    }

    /// Check whether slot `index` currently holds a value
    pub fn is_occupied(&self, index: usize) -> bool {
        !self.slots[index + GUARD_LANE].load(Ordering::Acquire).is_null()
    }

    /// Count of occupied slots; only meaningful when the array is at rest
    pub fn occupied(&self) -> usize {
        (0..self.len()).filter(|&i| self.is_occupied(i)).count()
    }
}

impl<T> Drop for PaddedSlotArray<T> {
    fn drop(&mut self) {
        for index in 0..self.len() {
            drop(self.take(index));
        }
    }
}

impl<T> std::fmt::Debug for PaddedSlotArray<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaddedSlotArray")
            .field("len", &self.len())
            .finish()
    }
}
