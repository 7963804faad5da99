//! Segregated size-class slab allocator.
//!
//! Requests are rounded up to power-of-two size classes, one slab pool per
//! class, which bounds internal fragmentation to within a factor of two of
//! the requested size. Each slab is a fixed 64 KiB region pre-divided into
//! blocks of the class size, with every block pre-linked into the slab's own
//! free list. Requests beyond the largest class bypass pooling entirely and
//! go straight to the general heap.
//!
//! Deallocation of a pooled block must find the exact slab that owns the
//! pointer, by linear address-range scan over the class's slab list. A
//! pointer no slab owns means the caller handed back memory this allocator
//! never issued for that class: that is corruption, and it panics.

use core::alloc::Layout;
use core::cell::{Cell, RefCell};
use core::ptr::NonNull;
use std::alloc;
use std::rc::Rc;

use super::region::Region;
use super::stats::{AllocatorStats, StatCounters, StatisticsProvider};
use super::traits::{Allocator, MemoryUsage, Resettable};
use crate::error::{AllocError, AllocResult};

#[cfg(feature = "logging")]
use tracing::{debug, error};

/// log2 of the smallest class's block size: class 0 holds 16-byte blocks.
pub const SIZE_START: usize = 4;

/// Number of size classes; class `SIZE_CLASSES` is the "too large" sentinel.
pub const SIZE_CLASSES: usize = 9;

/// Byte capacity of every slab.
pub const SLAB_SIZE: usize = 64 * 1024;

/// Maps a byte size to its class index.
///
/// The result is the smallest class whose block size is at least `size`,
/// computed from the bit width of `size - 1`; sizes beyond the largest
/// class map to the sentinel value [`SIZE_CLASSES`].
///
/// # Examples
/// ```
/// use stratalloc::allocator::segregated::{class_index, SIZE_CLASSES};
///
/// assert_eq!(class_index(1), 0); // 16-byte blocks
/// assert_eq!(class_index(16), 0);
/// assert_eq!(class_index(17), 1); // 32-byte blocks
/// assert_eq!(class_index(4096), 8); // largest pooled class
/// assert_eq!(class_index(4097), SIZE_CLASSES); // bypasses pooling
/// ```
#[must_use]
pub const fn class_index(size: usize) -> usize {
    if size == 0 {
        return 0;
    }
    let width = (usize::BITS - (size - 1).leading_zeros()) as usize;
    if width <= SIZE_START {
        0
    } else if width - SIZE_START >= SIZE_CLASSES {
        SIZE_CLASSES
    } else {
        width - SIZE_START
    }
}

/// Block size in bytes of a (non-sentinel) class.
#[must_use]
pub const fn block_size(class: usize) -> usize {
    debug_assert!(class < SIZE_CLASSES);
    1 << (class + SIZE_START)
}

/// Link node written into a free block's own bytes.
#[repr(C)]
struct FreeNode {
    next: *mut FreeNode,
}

/// One 64 KiB slab pre-divided into same-size blocks.
struct Slab {
    region: Region,
    free_head: Cell<*mut FreeNode>,
    free_count: Cell<usize>,
}

impl Slab {
    /// Allocates a slab and pre-links every block into its free list.
    fn new(block_size: usize) -> AllocResult<Self> {
        // Aligning the region to the block size makes every block address a
        // multiple of it, which covers any element alignment up to the block
        // size.
        let region = Region::new(SLAB_SIZE, block_size)?;

        let mut head: *mut FreeNode = core::ptr::null_mut();
        let mut block = region.base();
        let mut count = 0;
        while block + block_size <= region.end() {
            // SAFETY: block is a block_size-aligned address inside the fresh
            // region; nothing else references it yet.
            unsafe {
                let node = block as *mut FreeNode;
                (*node).next = head;
                head = node;
            }
            count += 1;
            block += block_size;
        }

        Ok(Self {
            region,
            free_head: Cell::new(head),
            free_count: Cell::new(count),
        })
    }

    fn has_free(&self) -> bool {
        !self.free_head.get().is_null()
    }

    fn owns(&self, addr: usize) -> bool {
        self.region.contains(addr)
    }

    /// Pops the free-list head. Callers check [`has_free`](Self::has_free).
    fn allocate(&self) -> NonNull<u8> {
        let node = self.free_head.get();
        debug_assert!(!node.is_null());

        // SAFETY: node is a free block of this slab; it was written as a
        // FreeNode when linked and has not been handed out since.
        unsafe {
            self.free_head.set((*node).next);
        }
        self.free_count.set(self.free_count.get() - 1);

        // SAFETY: node is non-null, asserted above.
        unsafe { NonNull::new_unchecked(node.cast::<u8>()) }
    }

    fn deallocate(&self, ptr: NonNull<u8>) {
        let node = ptr.as_ptr().cast::<FreeNode>();
        // SAFETY: ptr is a block of this slab (owner lookup precedes this
        // call) and blocks are at least pointer-sized and -aligned.
        unsafe {
            (*node).next = self.free_head.get();
        }
        self.free_head.set(node);
        self.free_count.set(self.free_count.get() + 1);
    }

    fn used_blocks(&self, block_size: usize) -> usize {
        SLAB_SIZE / block_size - self.free_count.get()
    }
}

struct SegregatedInner {
    classes: [RefCell<Vec<Slab>>; SIZE_CLASSES],
    /// Bytes live on the bypass path; the allocator remembers nothing else
    /// about large allocations.
    large_bytes: Cell<usize>,
    large_count: Cell<usize>,
    stats: StatCounters,
}

/// Size-class slab allocator with a large-object fallback path.
///
/// Cheap to clone: clones are handles onto the same class tables and compare
/// equal with `==`; memory allocated through one handle may be released
/// through any equal handle.
pub struct SegregatedAllocator {
    inner: Rc<SegregatedInner>,
}

impl SegregatedAllocator {
    /// Creates an allocator with empty class tables; slabs are acquired on
    /// demand.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(SegregatedInner {
                classes: core::array::from_fn(|_| RefCell::new(Vec::new())),
                large_bytes: Cell::new(0),
                large_count: Cell::new(0),
                stats: StatCounters::new(),
            }),
        }
    }

    /// Number of slabs currently owned by a class.
    ///
    /// # Panics
    /// If `class >= SIZE_CLASSES`.
    #[must_use]
    pub fn slab_count(&self, class: usize) -> usize {
        self.inner.classes[class].borrow().len()
    }

    /// Number of live allocations on the large-object bypass path.
    #[must_use]
    pub fn large_allocations(&self) -> usize {
        self.inner.large_count.get()
    }

    /// The class a request of `size` bytes at `align` lands in.
    ///
    /// Alignment participates because a block only guarantees alignment up
    /// to its own size; a stricter alignment bumps the request into the
    /// class whose blocks are that aligned.
    fn class_for(layout: Layout) -> usize {
        class_index(layout.size().max(layout.align()))
    }
}

impl Default for SegregatedAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: pooled blocks come from owned slabs, are block-size-aligned, and
// are never on a free list while handed out; large blocks come straight
// from the global allocator with the caller's layout.
unsafe impl Allocator for SegregatedAllocator {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        if layout.size() == 0 {
            return Ok(NonNull::slice_from_raw_parts(NonNull::dangling(), 0));
        }

        let class = Self::class_for(layout);

        if class == SIZE_CLASSES {
            // Too large to pool: straight to the general heap, no slab
            // bookkeeping.
            // SAFETY: layout has non-zero size, checked above.
            let raw = unsafe { alloc::alloc(layout) };
            let Some(ptr) = NonNull::new(raw) else {
                self.inner.stats.record_failure();
                return Err(AllocError::allocation_failed_with_layout(layout));
            };

            self.inner
                .large_bytes
                .set(self.inner.large_bytes.get() + layout.size());
            self.inner.large_count.set(self.inner.large_count.get() + 1);
            self.inner.stats.record_alloc(layout.size());
            return Ok(NonNull::slice_from_raw_parts(ptr, layout.size()));
        }

        let block = block_size(class);
        let mut slabs = self.inner.classes[class].borrow_mut();

        let index = match slabs.iter().position(Slab::has_free) {
            Some(index) => index,
            None => {
                match Slab::new(block) {
                    Ok(slab) => slabs.push(slab),
                    Err(err) => {
                        self.inner.stats.record_failure();
                        return Err(err);
                    }
                }

                #[cfg(feature = "logging")]
                debug!(class, block, slabs = slabs.len(), "size class grew by one slab");

                slabs.len() - 1
            }
        };

        let ptr = slabs[index].allocate();
        self.inner.stats.record_alloc(block);
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }

        let class = Self::class_for(layout);

        if class == SIZE_CLASSES {
            // Bypass path: release to the general heap, no slab list is
            // consulted.
            // SAFETY: ptr/layout match the original bypass allocation
            // (caller contract).
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
            self.inner
                .large_bytes
                .set(self.inner.large_bytes.get() - layout.size());
            self.inner.large_count.set(self.inner.large_count.get() - 1);
            self.inner.stats.record_dealloc(layout.size());
            return;
        }

        let addr = ptr.as_ptr() as usize;
        let slabs = self.inner.classes[class].borrow();

        match slabs.iter().find(|slab| slab.owns(addr)) {
            Some(slab) => {
                slab.deallocate(ptr);
                self.inner.stats.record_dealloc(block_size(class));
            }
            None => {
                // The pointer did not originate from this allocator/class
                // combination. There is no defined recovery.
                #[cfg(feature = "logging")]
                error!(
                    ptr = addr,
                    class,
                    "deallocated pointer is not owned by any slab of its class"
                );
                panic!(
                    "segregated deallocate: pointer {ptr:p} is not owned by any slab of class {class}"
                );
            }
        }
    }
}

impl MemoryUsage for SegregatedAllocator {
    fn used_memory(&self) -> usize {
        let pooled: usize = self
            .inner
            .classes
            .iter()
            .enumerate()
            .map(|(class, slabs)| {
                let block = block_size(class);
                slabs
                    .borrow()
                    .iter()
                    .map(|slab| slab.used_blocks(block) * block)
                    .sum::<usize>()
            })
            .sum();

        pooled + self.inner.large_bytes.get()
    }

    fn available_memory(&self) -> Option<usize> {
        None
    }

    fn total_memory(&self) -> Option<usize> {
        None
    }
}

impl Resettable for SegregatedAllocator {
    /// Drops every slab in every class. This is teardown of all pooled
    /// state; live bypass allocations are unaffected and still must be
    /// deallocated individually.
    unsafe fn reset(&self) {
        for slabs in &self.inner.classes {
            slabs.borrow_mut().clear();
        }
    }

    fn can_reset(&self) -> bool {
        true
    }
}

impl StatisticsProvider for SegregatedAllocator {
    fn statistics(&self) -> AllocatorStats {
        self.inner.stats.snapshot()
    }

    fn reset_statistics(&self) {
        self.inner.stats.reset();
    }
}

impl core::fmt::Debug for SegregatedAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let slabs: usize = (0..SIZE_CLASSES).map(|class| self.slab_count(class)).sum();
        f.debug_struct("SegregatedAllocator")
            .field("slabs", &slabs)
            .field("large_allocations", &self.large_allocations())
            .finish()
    }
}

impl Clone for SegregatedAllocator {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl PartialEq for SegregatedAllocator {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for SegregatedAllocator {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_index_boundaries() {
        assert_eq!(class_index(0), 0);
        assert_eq!(class_index(1), 0);
        assert_eq!(class_index(16), 0);
        assert_eq!(class_index(17), 1);
        assert_eq!(class_index(32), 1);
        assert_eq!(class_index(33), 2);
        assert_eq!(class_index(4096), 8);
        assert_eq!(class_index(4097), SIZE_CLASSES);
        assert_eq!(class_index(1 << 20), SIZE_CLASSES);
    }

    #[test]
    fn every_size_fits_its_class_block() {
        for size in 1..=4096 {
            let class = class_index(size);
            assert!(class < SIZE_CLASSES);
            assert!(block_size(class) >= size, "size {size} overflows its class");
        }
    }

    #[test]
    fn freed_block_is_reused_immediately() {
        let seg = SegregatedAllocator::new();
        let layout = Layout::from_size_align(24, 8).unwrap();

        // SAFETY: strict alloc/free pairing on one allocator.
        unsafe {
            let first = seg.allocate(layout).unwrap();
            seg.deallocate(first.cast(), layout);
            let again = seg.allocate(layout).unwrap();
            assert_eq!(first.as_ptr().cast::<u8>(), again.as_ptr().cast::<u8>());
            seg.deallocate(again.cast(), layout);
        }
    }

    #[test]
    fn slabs_grow_when_a_class_fills_up() {
        let seg = SegregatedAllocator::new();
        let layout = Layout::from_size_align(16, 8).unwrap();
        let per_slab = SLAB_SIZE / 16;

        // SAFETY: pointers are retained until the final frees below.
        unsafe {
            let mut ptrs = Vec::new();
            for _ in 0..per_slab {
                ptrs.push(seg.allocate(layout).unwrap());
            }
            assert_eq!(seg.slab_count(0), 1);

            ptrs.push(seg.allocate(layout).unwrap());
            assert_eq!(seg.slab_count(0), 2);

            for ptr in ptrs {
                seg.deallocate(ptr.cast(), layout);
            }
        }
        assert_eq!(seg.used_memory(), 0);
    }

    #[test]
    fn large_requests_bypass_the_slab_lists() {
        let seg = SegregatedAllocator::new();
        let layout = Layout::from_size_align(SLAB_SIZE / 8, 16).unwrap();
        assert_eq!(class_index(layout.size()), SIZE_CLASSES);

        // SAFETY: the value is written before being read.
        unsafe {
            let ptr = seg.allocate(layout).unwrap();
            ptr.as_ptr().cast::<u64>().write(42);
            assert_eq!(ptr.as_ptr().cast::<u64>().read(), 42);

            assert_eq!(seg.large_allocations(), 1);
            for class in 0..SIZE_CLASSES {
                assert_eq!(seg.slab_count(class), 0, "bypass touched class {class}");
            }

            seg.deallocate(ptr.cast(), layout);
        }
        assert_eq!(seg.large_allocations(), 0);
        assert_eq!(seg.used_memory(), 0);
    }

    #[test]
    fn alloc_free_cycles_keep_slab_counts_stable() {
        let seg = SegregatedAllocator::new();
        let layout = Layout::from_size_align(100, 8).unwrap();
        let class = class_index(100);

        // SAFETY: strict alloc/free pairing.
        unsafe {
            seg.deallocate(seg.allocate(layout).unwrap().cast(), layout);
        }
        assert_eq!(seg.slab_count(class), 1);

        for _ in 0..1000 {
            // SAFETY: strict alloc/free pairing.
            unsafe {
                let ptr = seg.allocate(layout).unwrap();
                seg.deallocate(ptr.cast(), layout);
            }
        }
        assert_eq!(seg.slab_count(class), 1);
        assert_eq!(seg.used_memory(), 0);
    }

    #[test]
    fn blocks_in_different_classes_do_not_interfere() {
        let seg = SegregatedAllocator::new();
        let small = Layout::from_size_align(16, 8).unwrap();
        let medium = Layout::from_size_align(300, 8).unwrap();

        // SAFETY: values written before read, freed exactly once.
        unsafe {
            let a = seg.allocate(small).unwrap();
            let b = seg.allocate(medium).unwrap();
            a.as_ptr().cast::<u64>().write(1);
            b.as_ptr().cast::<u64>().write(2);

            assert_eq!(a.as_ptr().cast::<u64>().read(), 1);
            assert_eq!(b.as_ptr().cast::<u64>().read(), 2);

            seg.deallocate(a.cast(), small);
            seg.deallocate(b.cast(), medium);
        }
    }

    #[test]
    #[should_panic(expected = "not owned by any slab")]
    fn foreign_pointer_is_a_fatal_fault() {
        let seg = SegregatedAllocator::new();
        let other = SegregatedAllocator::new();
        let layout = Layout::from_size_align(16, 8).unwrap();

        // SAFETY: the second call panics before touching the block.
        unsafe {
            // Touch the class so the fault is an owner-scan miss, not an
            // empty table.
            let own = seg.allocate(layout).unwrap();
            seg.deallocate(own.cast(), layout);

            let foreign = other.allocate(layout).unwrap();
            seg.deallocate(foreign.cast(), layout);
        }
    }

    #[test]
    fn strict_alignment_bumps_the_class() {
        let seg = SegregatedAllocator::new();
        // 8 bytes at 64-byte alignment cannot live in the 16-byte class.
        let layout = Layout::from_size_align(8, 64).unwrap();

        // SAFETY: freed exactly once.
        unsafe {
            let ptr = seg.allocate(layout).unwrap();
            assert_eq!(ptr.as_ptr().cast::<u8>() as usize % 64, 0);
            seg.deallocate(ptr.cast(), layout);
        }
        assert_eq!(seg.slab_count(class_index(64)), 1);
    }

    #[test]
    fn reset_drops_all_slabs() {
        let seg = SegregatedAllocator::new();
        let layout = Layout::from_size_align(16, 8).unwrap();

        // SAFETY: the pointer is not used after reset.
        unsafe {
            let ptr = seg.allocate(layout).unwrap();
            seg.deallocate(ptr.cast(), layout);
            assert_eq!(seg.slab_count(0), 1);

            seg.reset();
        }
        assert_eq!(seg.slab_count(0), 0);
        assert_eq!(seg.used_memory(), 0);
    }
}
