//! Heap-extension primitives.
//!
//! The free-list strategy treats "extend the process heap by N bytes" as an
//! external primitive: it asks for more space, installs a block header at the
//! returned address, and never gives the space back individually. This module
//! provides that primitive behind the [`HeapSource`] trait.
//!
//! Two sources are available:
//!
//! - [`SystemHeap`] obtains chunks from the global allocator and releases
//!   them only when the source itself is dropped. It is the portable default.
//! - [`ProcessHeap`] (Unix) moves the real program break with `sbrk(2)`.
//!   Extensions are never returned to the operating system.
//!
//! Both uphold the same contract: extensions are never reclaimed before the
//! source is torn down, so block headers written into them stay valid for the
//! lifetime of the allocator that owns the source.

use core::cell::RefCell;
use core::ptr::NonNull;
use std::alloc::{self, Layout};

use crate::error::{AllocError, AllocResult};

#[cfg(feature = "logging")]
use tracing::debug;

/// Alignment guaranteed for every extension base address.
///
/// Matches the strictest fundamental alignment (`max_align_t` on the
/// platforms this crate targets), so a header-sized prefix keeps the payload
/// suitably aligned for any ordinary element type.
pub const HEAP_ALIGN: usize = 16;

/// A source of fresh heap space.
///
/// Implementations must return a pointer aligned to [`HEAP_ALIGN`] and must
/// keep every extension alive until the source is dropped; there is no
/// per-extension release operation by design.
pub trait HeapSource {
    /// Extends the heap by `len` bytes, returning the base of the new space.
    ///
    /// # Errors
    /// Returns [`AllocError::HeapExhausted`] if the underlying primitive
    /// cannot provide the space.
    fn extend(&self, len: usize) -> AllocResult<NonNull<u8>>;
}

/// Heap source backed by the global allocator.
///
/// Each extension is a separate chunk; all chunks are released when the
/// source is dropped. Chunks are deliberately *not* contiguous; the
/// free-list strategy links blocks through headers, not adjacency, so this
/// is transparent to it.
#[derive(Default)]
pub struct SystemHeap {
    chunks: RefCell<Vec<(NonNull<u8>, Layout)>>,
}

impl SystemHeap {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of extensions handed out so far.
    #[must_use]
    pub fn extension_count(&self) -> usize {
        self.chunks.borrow().len()
    }
}

impl HeapSource for SystemHeap {
    fn extend(&self, len: usize) -> AllocResult<NonNull<u8>> {
        let layout = Layout::from_size_align(len.max(1), HEAP_ALIGN)
            .map_err(|_| AllocError::size_overflow("heap extension"))?;

        // SAFETY: layout has non-zero size (len.max(1)) and valid alignment.
        let raw = unsafe { alloc::alloc(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| AllocError::heap_exhausted(len))?;

        self.chunks.borrow_mut().push((ptr, layout));

        #[cfg(feature = "logging")]
        debug!(len, chunks = self.chunks.borrow().len(), "system heap extended");

        Ok(ptr)
    }
}

impl Drop for SystemHeap {
    fn drop(&mut self) {
        // Release in reverse-acquisition order, newest chunk first.
        for (ptr, layout) in self.chunks.get_mut().drain(..).rev() {
            // SAFETY: every recorded (ptr, layout) pair came from alloc::alloc
            // with exactly that layout, and nothing else frees it.
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use crate::util::padding_needed;

        /// Heap source that moves the real program break with `sbrk(2)`.
        ///
        /// This is the faithful rendition of the classic teaching-allocator
        /// primitive: space obtained here is part of the process data segment
        /// and is never returned to the operating system.
        ///
        /// The program break is process-wide state. Like every allocator in
        /// this crate, `ProcessHeap` assumes single-threaded use; driving it
        /// from multiple threads races the break against the rest of the
        /// process.
        #[derive(Debug, Default, Clone, Copy)]
        pub struct ProcessHeap;

        impl ProcessHeap {
            /// Creates a program-break source.
            #[must_use]
            pub fn new() -> Self {
                Self
            }

            fn sbrk(increment: usize) -> AllocResult<usize> {
                if increment > isize::MAX as usize {
                    return Err(AllocError::size_overflow("program break increment"));
                }

                // SAFETY: sbrk is always safe to call; it reports failure by
                // returning (void*)-1 without touching any memory.
                let previous = unsafe { libc::sbrk(increment as libc::intptr_t) };
                if previous == usize::MAX as *mut libc::c_void {
                    return Err(AllocError::heap_exhausted(increment));
                }
                Ok(previous as usize)
            }
        }

        impl HeapSource for ProcessHeap {
            fn extend(&self, len: usize) -> AllocResult<NonNull<u8>> {
                // The break can sit at any address; pad the extension so the
                // returned base honors HEAP_ALIGN.
                let current = Self::sbrk(0)?;
                let pad = padding_needed(current, HEAP_ALIGN);
                let total = len
                    .checked_add(pad)
                    .ok_or_else(|| AllocError::size_overflow("heap extension"))?;

                let previous = Self::sbrk(total)?;

                #[cfg(feature = "logging")]
                debug!(len, pad, "program break extended");

                // previous == current unless another caller moved the break
                // between the two calls, which single-threaded use rules out.
                NonNull::new((previous + pad) as *mut u8)
                    .ok_or_else(|| AllocError::heap_exhausted(len))
            }
        }
    }
}
