//! First-fit heap-extension allocator.
//!
//! The classic teaching model of `malloc`: every block is a header followed
//! by its payload, headers form one singly linked list in heap-growth order,
//! and a block's `free` flag is the sole truth about its availability.
//! Allocation scans the list first-fit and otherwise extends the heap;
//! deallocation just flips the flag.
//!
//! Two simplifications are deliberate and preserved faithfully:
//! - **No splitting.** A reused block is handed out whole, even when it is
//!   larger than the request; the remainder is wasted until that exact block
//!   is freed again.
//! - **No coalescing.** Adjacent free blocks are never merged, so freed
//!   space can only ever be reused as a whole block of equal-or-greater
//!   declared size. This is the primary fragmentation source this design
//!   intentionally exhibits.
//!
//! ```text
//! base -> [hdr|payload] -> [hdr|payload] -> [hdr|payload] -> (none)
//!          size:64         size:128         size:32
//!          free:true       free:false       free:true
//! ```

use core::alloc::Layout;
use core::cell::Cell;
use core::mem;
use core::ptr::{self, NonNull};
use std::rc::Rc;

use super::stats::{AllocatorStats, StatCounters, StatisticsProvider};
use super::traits::{Allocator, MemoryUsage, Resettable};
use crate::error::{AllocError, AllocResult};
use crate::heap::{HeapSource, SystemHeap, HEAP_ALIGN};
use crate::util::align_up;

#[cfg(feature = "logging")]
use tracing::debug;

/// Block metadata stored immediately before the payload.
#[repr(C)]
struct BlockHeader {
    /// Declared payload capacity in bytes; never changes after extension.
    size: usize,
    next: *mut BlockHeader,
    free: bool,
}

/// Bytes between a block's header address and its payload address. Padded so
/// the payload inherits the extension's [`HEAP_ALIGN`] alignment.
const HEADER_SIZE: usize = align_up(mem::size_of::<BlockHeader>(), HEAP_ALIGN);

struct FreeListInner<H> {
    heap: H,
    base: Cell<*mut BlockHeader>,
    tail: Cell<*mut BlockHeader>,
    block_count: Cell<usize>,
    extension_count: Cell<usize>,
    live_bytes: Cell<usize>,
    extended_bytes: Cell<usize>,
    stats: StatCounters,
}

/// Sbrk-style allocator over a process-extendable heap.
///
/// Generic over its [`HeapSource`]; [`new`](Self::new) uses the portable
/// [`SystemHeap`], while `with_source(ProcessHeap)` gives the literal
/// program-break rendition on Unix.
///
/// Cheap to clone: clones are handles onto the same block list and compare
/// equal with `==`; memory allocated through one handle may be released
/// through any equal handle.
pub struct FreeListAllocator<H: HeapSource = SystemHeap> {
    inner: Rc<FreeListInner<H>>,
}

impl FreeListAllocator<SystemHeap> {
    /// Creates an allocator backed by the global allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::with_source(SystemHeap::new())
    }
}

impl Default for FreeListAllocator<SystemHeap> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: HeapSource> FreeListAllocator<H> {
    /// Creates an allocator drawing extensions from `heap`.
    #[must_use]
    pub fn with_source(heap: H) -> Self {
        Self {
            inner: Rc::new(FreeListInner {
                heap,
                base: Cell::new(ptr::null_mut()),
                tail: Cell::new(ptr::null_mut()),
                block_count: Cell::new(0),
                extension_count: Cell::new(0),
                live_bytes: Cell::new(0),
                extended_bytes: Cell::new(0),
                stats: StatCounters::new(),
            }),
        }
    }

    /// Number of blocks in the list, free or not.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.inner.block_count.get()
    }

    /// Number of heap extensions performed.
    #[must_use]
    pub fn extension_count(&self) -> usize {
        self.inner.extension_count.get()
    }

    /// First-fit scan: the first free block whose declared size covers the
    /// request.
    fn find_free_block(&self, size: usize) -> Option<NonNull<BlockHeader>> {
        let mut current = self.inner.base.get();
        while !current.is_null() {
            // SAFETY: every header in the list was written by extend_with and
            // its backing extension is alive until source teardown.
            unsafe {
                if (*current).free && (*current).size >= size {
                    return Some(NonNull::new_unchecked(current));
                }
                current = (*current).next;
            }
        }
        None
    }

    /// Extends the heap by one block and appends it at the tail.
    fn extend_with(&self, size: usize) -> AllocResult<NonNull<BlockHeader>> {
        let inner = &*self.inner;
        let total = HEADER_SIZE
            .checked_add(size)
            .ok_or_else(|| AllocError::size_overflow("block extension"))?;

        let raw = inner.heap.extend(total)?;
        let header = raw.as_ptr().cast::<BlockHeader>();

        // SAFETY: the extension is total >= HEADER_SIZE fresh bytes aligned
        // to HEAP_ALIGN, so the header fits at its base.
        unsafe {
            header.write(BlockHeader {
                size,
                next: ptr::null_mut(),
                free: false,
            });
        }

        let tail = inner.tail.get();
        if tail.is_null() {
            inner.base.set(header);
        } else {
            // SAFETY: tail points at the live last header of the list.
            unsafe { (*tail).next = header };
        }
        inner.tail.set(header);

        inner.block_count.set(inner.block_count.get() + 1);
        inner.extension_count.set(inner.extension_count.get() + 1);
        inner.extended_bytes.set(inner.extended_bytes.get() + total);

        #[cfg(feature = "logging")]
        debug!(size, blocks = inner.block_count.get(), "heap extended by one block");

        // SAFETY: header was just written and is non-null.
        Ok(unsafe { NonNull::new_unchecked(header) })
    }

    #[inline]
    fn header_of(ptr: NonNull<u8>) -> *mut BlockHeader {
        (ptr.as_ptr() as usize - HEADER_SIZE) as *mut BlockHeader
    }

    #[inline]
    fn payload_of(header: NonNull<BlockHeader>) -> NonNull<u8> {
        // SAFETY: every block's extension covers HEADER_SIZE + size bytes,
        // so the payload address is in-bounds and non-null.
        unsafe { NonNull::new_unchecked((header.as_ptr() as usize + HEADER_SIZE) as *mut u8) }
    }

    /// Whether `ptr` falls inside the payload of one of this list's blocks.
    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        let mut current = self.inner.base.get();
        while !current.is_null() {
            // SAFETY: list traversal over live headers.
            unsafe {
                let payload = current as usize + HEADER_SIZE;
                if addr >= payload && addr < payload + (*current).size {
                    return true;
                }
                current = (*current).next;
            }
        }
        false
    }

    /// Total bytes sitting in free blocks.
    fn free_bytes(&self) -> usize {
        let mut total = 0;
        let mut current = self.inner.base.get();
        while !current.is_null() {
            // SAFETY: list traversal over live headers.
            unsafe {
                if (*current).free {
                    total += (*current).size;
                }
                current = (*current).next;
            }
        }
        total
    }
}

// SAFETY: payloads sit inside heap extensions that stay alive until source
// teardown; a block is never handed out while its free flag is clear.
unsafe impl<H: HeapSource> Allocator for FreeListAllocator<H> {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        if layout.size() == 0 {
            return Ok(NonNull::slice_from_raw_parts(NonNull::dangling(), 0));
        }

        if layout.align() > HEAP_ALIGN {
            self.inner.stats.record_failure();
            return Err(AllocError::invalid_alignment(layout.align()));
        }

        let header = match self.find_free_block(layout.size()) {
            Some(header) => {
                // Reuse the whole block, however large its declared size is.
                // SAFETY: header is a live block of this list.
                unsafe { (*header.as_ptr()).free = false };
                header
            }
            None => match self.extend_with(layout.size()) {
                Ok(header) => header,
                Err(err) => {
                    self.inner.stats.record_failure();
                    return Err(err);
                }
            },
        };

        // SAFETY: header is live; size was declared at extension time.
        let block_size = unsafe { (*header.as_ptr()).size };
        self.inner
            .live_bytes
            .set(self.inner.live_bytes.get() + block_size);
        self.inner.stats.record_alloc(block_size);

        Ok(NonNull::slice_from_raw_parts(
            Self::payload_of(header),
            layout.size(),
        ))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }

        debug_assert!(
            self.contains(ptr.as_ptr()),
            "pointer does not belong to this free list"
        );
        let header = Self::header_of(ptr);

        // SAFETY: header precedes a payload this allocator issued (caller
        // contract); flipping the flag is the entire deallocation.
        unsafe {
            (*header).free = true;
            self.inner
                .live_bytes
                .set(self.inner.live_bytes.get() - (*header).size);
            self.inner.stats.record_dealloc((*header).size);
        }
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> AllocResult<NonNull<[u8]>> {
        // Whole-block reuse: with no splitting, a block whose declared size
        // already covers the request resizes for free.
        if old_layout.size() != 0
            && new_layout.size() != 0
            && new_layout.align() <= HEAP_ALIGN
        {
            let header = Self::header_of(ptr);
            // SAFETY: header precedes a live payload (caller contract).
            if unsafe { (*header).size } >= new_layout.size() {
                return Ok(NonNull::slice_from_raw_parts(ptr, new_layout.size()));
            }
        }

        // SAFETY: forwarding the caller's contract.
        let new_ptr = unsafe { self.allocate(new_layout)? };

        let copy = old_layout.size().min(new_layout.size());
        if copy > 0 {
            // SAFETY: distinct blocks; both sides valid for copy bytes.
            unsafe {
                ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr().cast::<u8>(), copy);
            }
        }

        // SAFETY: ptr/old_layout match the original allocation.
        unsafe { self.deallocate(ptr, old_layout) };
        Ok(new_ptr)
    }
}

impl<H: HeapSource> MemoryUsage for FreeListAllocator<H> {
    fn used_memory(&self) -> usize {
        self.inner.live_bytes.get()
    }

    fn available_memory(&self) -> Option<usize> {
        Some(self.free_bytes())
    }

    fn total_memory(&self) -> Option<usize> {
        Some(self.inner.extended_bytes.get())
    }
}

impl<H: HeapSource> Resettable for FreeListAllocator<H> {
    /// Marks every block free. No memory moves and nothing is returned to
    /// the heap source; the blocks simply become reusable whole.
    unsafe fn reset(&self) {
        let mut current = self.inner.base.get();
        while !current.is_null() {
            // SAFETY: list traversal over live headers; reset's contract
            // says no payload is in use anymore.
            unsafe {
                (*current).free = true;
                current = (*current).next;
            }
        }
        self.inner.live_bytes.set(0);
    }

    fn can_reset(&self) -> bool {
        true
    }
}

impl<H: HeapSource> StatisticsProvider for FreeListAllocator<H> {
    fn statistics(&self) -> AllocatorStats {
        self.inner.stats.snapshot()
    }

    fn reset_statistics(&self) {
        self.inner.stats.reset();
    }
}

impl<H: HeapSource> core::fmt::Debug for FreeListAllocator<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FreeListAllocator")
            .field("blocks", &self.block_count())
            .field("extensions", &self.extension_count())
            .field("live_bytes", &self.inner.live_bytes.get())
            .finish()
    }
}

impl<H: HeapSource> Clone for FreeListAllocator<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<H: HeapSource> PartialEq for FreeListAllocator<H> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<H: HeapSource> Eq for FreeListAllocator<H> {}
