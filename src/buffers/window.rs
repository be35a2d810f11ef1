//! Raw heap segments and the visible windows buffers expose over them

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;

/// An owned heap allocation backing one pooled buffer.
///
/// The segment is freed exactly once, when the last handle referencing it is
/// dropped. Views created from a buffer alias the same segment; callers must
/// not write overlapping ranges from multiple threads at the same time.
pub(crate) struct Segment {
    data: NonNull<u8>,
    len: usize,
}

impl Segment {
    /// Allocate a zeroed segment of `len` bytes
    pub fn alloc(len: usize) -> Segment {
        if len == 0 {
            return Segment {
                data: NonNull::dangling(),
                len: 0,
            };
        }
        let layout = Layout::array::<u8>(len).expect("segment layout");
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        let data = NonNull::new(ptr).unwrap_or_else(|| std::alloc::handle_alloc_error(layout));
        Segment { data, len }
    }

    /// Take ownership of existing bytes without copying
    pub fn from_vec(bytes: Vec<u8>) -> Segment {
        let boxed: Box<[u8]> = bytes.into_boxed_slice();
        let len = boxed.len();
        if len == 0 {
            return Segment {
                data: NonNull::dangling(),
                len: 0,
            };
        }
        let raw = Box::into_raw(boxed) as *mut u8;
        Segment {
            // Box pointers are never null
            data: unsafe { NonNull::new_unchecked(raw) },
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }
        let layout = Layout::array::<u8>(self.len).unwrap();
        unsafe {
            std::alloc::dealloc(self.data.as_ptr(), layout);
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment").field("len", &self.len).finish()
    }
}

unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

/// A view of a contiguous byte range within a shared [`Segment`].
///
/// Windows are cheap to clone; slicing and splitting buffers only narrows
/// the range, never copies bytes.
#[derive(Clone, Debug)]
pub(crate) struct Window {
    segment: Arc<Segment>,
    offset: usize,
    len: usize,
}

impl Window {
    /// Window covering the whole segment
    pub fn full(segment: Arc<Segment>) -> Window {
        let len = segment.len();
        Window {
            segment,
            offset: 0,
            len,
        }
    }

    /// Narrowed window over `[from, to)` of this window
    pub fn narrowed(&self, from: usize, to: usize) -> Window {
        debug_assert!(from <= to && to <= self.len);
        Window {
            segment: Arc::clone(&self.segment),
            offset: self.offset + from,
            len: to - from,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Bytes of this window
    pub fn as_slice(&self) -> &[u8] {
        if self.len == 0 {
            return &[];
        }
        unsafe {
            std::slice::from_raw_parts(self.segment.data.as_ptr().add(self.offset), self.len)
        }
    }

    /// Mutable bytes of this window.
    ///
    /// Views deriving from the same buffer alias the same segment; the
    /// caller coordinates overlapping writes, as with any shared byte
    /// buffer handed across an I/O boundary.
    #[allow(clippy::mut_from_ref)]
    pub fn as_mut_slice(&self) -> &mut [u8] {
        if self.len == 0 {
            return &mut [];
        }
        unsafe {
            std::slice::from_raw_parts_mut(self.segment.data.as_ptr().add(self.offset), self.len)
        }
    }
}
