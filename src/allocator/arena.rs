//! Bump-pointer arena allocator.
//!
//! One contiguous region, one cursor. Allocation aligns the cursor for the
//! request and advances it by exactly the requested byte count; deallocation
//! is a deliberate no-op. The only way to reclaim space is [`reset`], which
//! rewinds the cursor to the base of the region in O(1) and invalidates every
//! pointer the arena ever issued.
//!
//! All handles cloned from one arena share one region, so interleaved use for
//! unrelated purposes competes for the same capacity.
//!
//! [`reset`]: crate::allocator::Resettable::reset

use core::alloc::Layout;
use core::cell::{Cell, RefCell};
use core::ptr::NonNull;
use std::rc::Rc;

use super::region::Region;
use super::stats::{AllocatorStats, StatCounters, StatisticsProvider};
use super::traits::{Allocator, MemoryUsage, Resettable};
use crate::error::{AllocError, AllocResult};
use crate::util::align_up;

/// Base alignment of the backing region. Individual requests with stricter
/// alignment are handled by padding the cursor.
const ARENA_ALIGN: usize = 16;

struct ArenaInner {
    region: RefCell<Region>,
    cursor: Cell<usize>,
    stats: StatCounters,
}

/// Bump allocator over a single owned region.
///
/// Cheap to clone: clones are handles onto the same region and compare equal
/// with `==`. Memory allocated through one handle may be "deallocated" (a
/// no-op) or outlived through any equal handle.
pub struct ArenaAllocator {
    inner: Rc<ArenaInner>,
}

impl ArenaAllocator {
    /// Creates an arena with a region of `capacity` bytes.
    ///
    /// # Errors
    /// [`AllocError::ExceedsMaxSize`] for a zero capacity,
    /// [`AllocError::AllocationFailed`] if the region cannot be obtained.
    pub fn new(capacity: usize) -> AllocResult<Self> {
        if capacity == 0 {
            return Err(AllocError::exceeds_max_size(0, isize::MAX as usize));
        }

        let region = Region::new(capacity, ARENA_ALIGN)?;
        let cursor = Cell::new(region.base());
        Ok(Self {
            inner: Rc::new(ArenaInner {
                region: RefCell::new(region),
                cursor,
                stats: StatCounters::new(),
            }),
        })
    }

    /// Replaces the backing region with a fresh one of `capacity` bytes,
    /// releasing the previous region.
    ///
    /// # Safety
    /// Every pointer issued from the previous region becomes dangling; the
    /// caller guarantees none is used again.
    ///
    /// # Errors
    /// Same failure modes as [`new`](Self::new). On error the previous
    /// region is left untouched.
    pub unsafe fn init(&self, capacity: usize) -> AllocResult<()> {
        if capacity == 0 {
            return Err(AllocError::exceeds_max_size(0, isize::MAX as usize));
        }

        let fresh = Region::new(capacity, ARENA_ALIGN)?;
        self.inner.cursor.set(fresh.base());
        *self.inner.region.borrow_mut() = fresh;
        Ok(())
    }

    /// Total capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.region.borrow().len()
    }

    /// Bytes consumed so far, alignment padding included.
    #[must_use]
    pub fn used(&self) -> usize {
        self.inner.cursor.get() - self.inner.region.borrow().base()
    }

    /// Bytes still available.
    #[must_use]
    pub fn available(&self) -> usize {
        self.capacity() - self.used()
    }

    fn try_bump(&self, size: usize, align: usize) -> AllocResult<usize> {
        let region = self.inner.region.borrow();
        let cursor = self.inner.cursor.get();

        let aligned = align_up(cursor, align);
        let next = aligned
            .checked_add(size)
            .ok_or_else(|| AllocError::size_overflow("arena cursor advance"))?;

        if next > region.end() {
            // Cursor stays where it was; the failure must not corrupt state.
            return Err(AllocError::arena_exhausted(
                size,
                region.end().saturating_sub(cursor),
            ));
        }

        self.inner.cursor.set(next);
        Ok(aligned)
    }
}

// SAFETY: pointers are handed out from the owned region strictly below the
// cursor, so they are valid, exclusive and aligned per try_bump.
unsafe impl Allocator for ArenaAllocator {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        if layout.size() == 0 {
            return Ok(NonNull::slice_from_raw_parts(NonNull::dangling(), 0));
        }

        match self.try_bump(layout.size(), layout.align()) {
            Ok(addr) => {
                self.inner.stats.record_alloc(layout.size());
                // SAFETY: addr points into the live region and is non-zero.
                let ptr = unsafe { NonNull::new_unchecked(addr as *mut u8) };
                Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
            }
            Err(err) => {
                self.inner.stats.record_failure();
                Err(err)
            }
        }
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        // Individual objects are never reclaimed; count the call, reclaim
        // no bytes.
        self.inner.stats.record_dealloc(0);
    }
}

impl MemoryUsage for ArenaAllocator {
    fn used_memory(&self) -> usize {
        self.used()
    }

    fn available_memory(&self) -> Option<usize> {
        Some(self.available())
    }

    fn total_memory(&self) -> Option<usize> {
        Some(self.capacity())
    }
}

impl Resettable for ArenaAllocator {
    unsafe fn reset(&self) {
        self.inner.cursor.set(self.inner.region.borrow().base());
    }

    fn can_reset(&self) -> bool {
        true
    }
}

impl StatisticsProvider for ArenaAllocator {
    fn statistics(&self) -> AllocatorStats {
        self.inner.stats.snapshot()
    }

    fn reset_statistics(&self) {
        self.inner.stats.reset();
    }
}

impl core::fmt::Debug for ArenaAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ArenaAllocator")
            .field("capacity", &self.capacity())
            .field("used", &self.used())
            .finish()
    }
}

impl Clone for ArenaAllocator {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl PartialEq for ArenaAllocator {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ArenaAllocator {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_increase_by_exactly_the_requested_size() {
        let arena = ArenaAllocator::new(1024).unwrap();
        let layout = Layout::new::<u64>();

        // SAFETY: requests fit well within capacity.
        unsafe {
            let mut prev = arena.allocate(layout).unwrap().as_ptr().cast::<u8>() as usize;
            for _ in 0..16 {
                let next = arena.allocate(layout).unwrap().as_ptr().cast::<u8>() as usize;
                assert_eq!(next, prev + layout.size());
                prev = next;
            }
        }
    }

    #[test]
    fn two_ints_are_exactly_one_int_apart() {
        let arena = ArenaAllocator::new(1024).unwrap();
        let layout = Layout::new::<i32>();

        // SAFETY: 8 bytes fit in a 1024-byte arena.
        unsafe {
            let a = arena.allocate(layout).unwrap().as_ptr().cast::<u8>() as usize;
            let b = arena.allocate(layout).unwrap().as_ptr().cast::<u8>() as usize;
            assert_eq!(b - a, core::mem::size_of::<i32>());
        }
    }

    #[test]
    fn exhaustion_fails_without_corrupting_the_cursor() {
        let arena = ArenaAllocator::new(64).unwrap();

        // SAFETY: all pointers stay unused.
        unsafe {
            arena
                .allocate(Layout::from_size_align(48, 1).unwrap())
                .unwrap();
            let before = arena.used();

            let err = arena
                .allocate(Layout::from_size_align(32, 1).unwrap())
                .unwrap_err();
            assert_eq!(
                err,
                AllocError::ArenaExhausted {
                    requested: 32,
                    available: 16
                }
            );
            assert_eq!(arena.used(), before);

            // A smaller request still succeeds afterwards.
            arena
                .allocate(Layout::from_size_align(16, 1).unwrap())
                .unwrap();
        }
    }

    #[test]
    fn reset_rewinds_to_the_first_address() {
        let arena = ArenaAllocator::new(1024).unwrap();
        let layout = Layout::new::<u64>();

        // SAFETY: nothing is read from the allocations.
        unsafe {
            let first = arena.allocate(layout).unwrap().as_ptr().cast::<u8>() as usize;
            arena.allocate(layout).unwrap();
            arena.allocate(layout).unwrap();

            arena.reset();
            assert_eq!(arena.used(), 0);

            let again = arena.allocate(layout).unwrap().as_ptr().cast::<u8>() as usize;
            assert_eq!(again, first);
        }
    }

    #[test]
    fn usage_is_non_decreasing_across_alloc_free_cycles() {
        let arena = ArenaAllocator::new(4096).unwrap();
        let layout = Layout::new::<u64>();

        let mut last_used = 0;
        for _ in 0..8 {
            // SAFETY: deallocate is a no-op; the pointer is not reused.
            unsafe {
                let ptr = arena.allocate(layout).unwrap();
                arena.deallocate(ptr.cast(), layout);
            }
            assert!(arena.used() > last_used);
            last_used = arena.used();
        }
    }

    #[test]
    fn init_replaces_the_region() {
        let arena = ArenaAllocator::new(64).unwrap();
        // SAFETY: no pointer from the old region is retained.
        unsafe {
            arena.allocate(Layout::from_size_align(64, 1).unwrap()).unwrap();
            assert_eq!(arena.available(), 0);

            arena.init(256).unwrap();
        }
        assert_eq!(arena.capacity(), 256);
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(ArenaAllocator::new(0).is_err());
    }

    #[test]
    fn clones_share_the_region_and_compare_equal() {
        let arena = ArenaAllocator::new(1024).unwrap();
        let other = arena.clone();
        assert_eq!(arena, other);

        let layout = Layout::new::<u32>();
        // SAFETY: both handles refer to the same live region.
        unsafe {
            let a = arena.allocate(layout).unwrap().as_ptr().cast::<u8>() as usize;
            let b = other.allocate(layout).unwrap().as_ptr().cast::<u8>() as usize;
            assert_eq!(b, a + 4);
        }
        assert_eq!(arena.used(), 8);

        let unrelated = ArenaAllocator::new(1024).unwrap();
        assert_ne!(arena, unrelated);
    }

    #[test]
    fn stats_track_allocations_and_failures() {
        let arena = ArenaAllocator::new(32).unwrap();
        // SAFETY: pointers stay unused.
        unsafe {
            arena.allocate(Layout::from_size_align(24, 1).unwrap()).unwrap();
            let _ = arena.allocate(Layout::from_size_align(24, 1).unwrap());
        }

        let stats = arena.statistics();
        assert_eq!(stats.allocation_count, 1);
        assert_eq!(stats.failed_allocations, 1);
        assert_eq!(stats.allocated_bytes, 24);
    }
}
