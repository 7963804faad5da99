//! Fixed-slot pool allocator with slab growth.
//!
//! The pool serves objects of one size class: every slot is large enough for
//! one element *or* one free-list link, whichever is bigger, at the stricter
//! of the two alignments. Free slots store the link inside the slot bytes
//! themselves (the classic intrusive trick), so bookkeeping costs nothing
//! beyond the slots.
//!
//! Allocation order: pop the free list if it is non-empty, otherwise bump
//! within the newest slab, otherwise grow by one slab of fixed byte capacity.
//! Slabs are never merged and never released before teardown; teardown drops
//! them in reverse-acquisition order.
//!
//! # Memory layout
//! ```text
//! slab 0: [slot][slot][slot]...[slot]
//! slab 1: [slot][slot][slot]...[slot]   <- newest, bump cursor lives here
//!            |           ^
//!            v           |
//!          free list threads through freed slots, pool-wide
//! ```

use core::alloc::Layout;
use core::cell::{Cell, RefCell};
use core::mem;
use core::ptr::NonNull;
use std::rc::Rc;

use super::region::Region;
use super::stats::{AllocatorStats, StatCounters, StatisticsProvider};
use super::traits::{Allocator, MemoryUsage, Resettable};
use crate::error::{AllocError, AllocResult};
use crate::util::align_up;

#[cfg(feature = "logging")]
use tracing::debug;

/// Default byte capacity of one slab.
pub const DEFAULT_SLAB_SIZE: usize = 4096;

/// Construction-time configuration for [`PoolAllocator`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Byte capacity of each slab. Must hold at least two slots.
    pub slab_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            slab_size: DEFAULT_SLAB_SIZE,
        }
    }
}

impl PoolConfig {
    /// Config with a custom slab capacity.
    #[must_use]
    pub fn with_slab_size(slab_size: usize) -> Self {
        Self { slab_size }
    }
}

/// Link node written into a free slot's own bytes.
#[repr(C)]
struct FreeSlot {
    next: *mut FreeSlot,
}

struct PoolInner {
    slot_size: usize,
    slot_align: usize,
    slab_size: usize,
    slabs: RefCell<Vec<Region>>,
    /// Next untouched slot in the newest slab.
    cursor: Cell<usize>,
    /// End of the newest slab.
    limit: Cell<usize>,
    free_head: Cell<*mut FreeSlot>,
    free_len: Cell<usize>,
    live: Cell<usize>,
    stats: StatCounters,
}

/// Fixed-slot allocator that grows by appending heap-obtained slabs.
///
/// Cheap to clone: clones are handles onto the same slab set and compare
/// equal with `==`; memory allocated through one handle may be released
/// through any equal handle.
pub struct PoolAllocator {
    inner: Rc<PoolInner>,
}

impl PoolAllocator {
    /// Creates a pool for slots of `slot_size` bytes at `slot_align`.
    ///
    /// Both are rounded up so a slot can also hold the intrusive free-list
    /// link: the effective slot size is
    /// `max(slot_size, size_of::<*mut u8>())` rounded to the effective
    /// alignment `max(slot_align, align_of::<*mut u8>())`.
    ///
    /// # Panics
    /// If `slot_align` is not a power of two, or the slab capacity cannot
    /// hold at least two slots. Both are programmer errors in the pool's
    /// static sizing, not runtime conditions.
    #[must_use]
    pub fn new(slot_size: usize, slot_align: usize) -> Self {
        Self::with_config(slot_size, slot_align, PoolConfig::default())
    }

    /// Creates a pool with explicit configuration.
    ///
    /// # Panics
    /// Same conditions as [`new`](Self::new).
    #[must_use]
    pub fn with_config(slot_size: usize, slot_align: usize, config: PoolConfig) -> Self {
        assert!(
            slot_align.is_power_of_two(),
            "slot alignment must be a power of two, got {slot_align}"
        );

        let align = slot_align.max(mem::align_of::<*mut FreeSlot>());
        let size = align_up(slot_size.max(mem::size_of::<*mut FreeSlot>()), align);

        assert!(
            config.slab_size >= 2 * size,
            "slab capacity {} cannot hold two {size}-byte slots",
            config.slab_size
        );

        Self {
            inner: Rc::new(PoolInner {
                slot_size: size,
                slot_align: align,
                slab_size: config.slab_size,
                slabs: RefCell::new(Vec::new()),
                cursor: Cell::new(0),
                limit: Cell::new(0),
                free_head: Cell::new(core::ptr::null_mut()),
                free_len: Cell::new(0),
                live: Cell::new(0),
                stats: StatCounters::new(),
            }),
        }
    }

    /// Creates a pool sized for elements of type `T`.
    #[must_use]
    pub fn for_type<T>() -> Self {
        let layout = Layout::new::<T>();
        Self::new(layout.size(), layout.align())
    }

    /// Creates a pool sized for `T` with explicit configuration.
    #[must_use]
    pub fn for_type_with_config<T>(config: PoolConfig) -> Self {
        let layout = Layout::new::<T>();
        Self::with_config(layout.size(), layout.align(), config)
    }

    /// Effective slot size in bytes.
    #[must_use]
    pub fn slot_size(&self) -> usize {
        self.inner.slot_size
    }

    /// Effective slot alignment.
    #[must_use]
    pub fn slot_align(&self) -> usize {
        self.inner.slot_align
    }

    /// Number of slabs acquired so far.
    #[must_use]
    pub fn slab_count(&self) -> usize {
        self.inner.slabs.borrow().len()
    }

    /// Number of slots currently on the free list.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.inner.free_len.get()
    }

    /// Number of slots currently handed out.
    #[must_use]
    pub fn live_slots(&self) -> usize {
        self.inner.live.get()
    }

    /// Whether `ptr` falls inside one of this pool's slabs.
    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        self.inner.slabs.borrow().iter().any(|s| s.contains(addr))
    }

    /// Appends a fresh slab and points the bump cursor at its first slot.
    fn grow(&self) -> AllocResult<()> {
        let inner = &*self.inner;
        let region = Region::new(inner.slab_size, inner.slot_align)?;

        // The region base is already slot-aligned; align_up records the
        // requirement that the first slot honor the link alignment too.
        let first = align_up(region.base(), inner.slot_align);
        inner.cursor.set(first);
        inner.limit.set(region.end());
        inner.slabs.borrow_mut().push(region);

        #[cfg(feature = "logging")]
        debug!(
            slabs = inner.slabs.borrow().len(),
            slab_size = inner.slab_size,
            "pool grew by one slab"
        );

        Ok(())
    }

    fn pop_free(&self) -> Option<NonNull<u8>> {
        let head = self.inner.free_head.get();
        if head.is_null() {
            return None;
        }

        // SAFETY: head was written as a FreeSlot when the slot was freed and
        // the slot has not been handed out since.
        let next = unsafe { (*head).next };
        self.inner.free_head.set(next);
        self.inner.free_len.set(self.inner.free_len.get() - 1);

        // SAFETY: head is non-null, checked above.
        Some(unsafe { NonNull::new_unchecked(head.cast::<u8>()) })
    }

    fn push_free(&self, ptr: NonNull<u8>) {
        let slot = ptr.as_ptr().cast::<FreeSlot>();
        // SAFETY: the slot belongs to this pool (deallocate contract) and is
        // at least pointer-sized and pointer-aligned by construction.
        unsafe {
            (*slot).next = self.inner.free_head.get();
        }
        self.inner.free_head.set(slot);
        self.inner.free_len.set(self.inner.free_len.get() + 1);
    }
}

// SAFETY: slots come from owned slabs, are slot_align-aligned by
// construction, and are never on the free list while handed out.
unsafe impl Allocator for PoolAllocator {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        if layout.size() == 0 {
            return Ok(NonNull::slice_from_raw_parts(NonNull::dangling(), 0));
        }

        if layout.size() > self.inner.slot_size {
            self.inner.stats.record_failure();
            return Err(AllocError::exceeds_max_size(
                layout.size(),
                self.inner.slot_size,
            ));
        }
        if layout.align() > self.inner.slot_align {
            self.inner.stats.record_failure();
            return Err(AllocError::invalid_alignment(layout.align()));
        }

        let ptr = match self.pop_free() {
            Some(ptr) => ptr,
            None => {
                // No freed slot to reuse; bump, growing first if the newest
                // slab has no untouched slots left.
                if self.inner.cursor.get() + self.inner.slot_size > self.inner.limit.get() {
                    if let Err(err) = self.grow() {
                        self.inner.stats.record_failure();
                        return Err(err);
                    }
                }

                let addr = self.inner.cursor.get();
                self.inner.cursor.set(addr + self.inner.slot_size);
                // SAFETY: addr points at an untouched slot inside a live slab.
                unsafe { NonNull::new_unchecked(addr as *mut u8) }
            }
        };

        self.inner.live.set(self.inner.live.get() + 1);
        // A whole slot is consumed regardless of the requested size.
        self.inner.stats.record_alloc(self.inner.slot_size);
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }

        debug_assert!(
            self.contains(ptr.as_ptr()),
            "pointer does not belong to this pool"
        );

        self.push_free(ptr);
        self.inner.live.set(self.inner.live.get() - 1);
        self.inner.stats.record_dealloc(self.inner.slot_size);
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        _old_layout: Layout,
        new_layout: Layout,
    ) -> AllocResult<NonNull<[u8]>> {
        // A slot is a slot: any request that fits keeps the same storage.
        if new_layout.size() <= self.inner.slot_size
            && new_layout.align() <= self.inner.slot_align
        {
            return Ok(NonNull::slice_from_raw_parts(ptr, new_layout.size()));
        }

        Err(AllocError::exceeds_max_size(
            new_layout.size(),
            self.inner.slot_size,
        ))
    }
}

impl MemoryUsage for PoolAllocator {
    fn used_memory(&self) -> usize {
        self.inner.live.get() * self.inner.slot_size
    }

    fn available_memory(&self) -> Option<usize> {
        // Reusable without growing: freed slots plus the untouched tail of
        // the newest slab.
        let untouched = self.inner.limit.get() - self.inner.cursor.get();
        Some(self.inner.free_len.get() * self.inner.slot_size + untouched)
    }

    fn total_memory(&self) -> Option<usize> {
        Some(self.slab_count() * self.inner.slab_size)
    }
}

impl Resettable for PoolAllocator {
    unsafe fn reset(&self) {
        let inner = &*self.inner;
        let slabs = inner.slabs.borrow();

        // Rebuild the free list over every slot of every slab. Slabs are
        // kept: reset reclaims slots, not memory.
        inner.free_head.set(core::ptr::null_mut());
        inner.free_len.set(0);

        for slab in slabs.iter() {
            let first = align_up(slab.base(), inner.slot_align);
            let mut addr = first;
            while addr + inner.slot_size <= slab.end() {
                // SAFETY: addr is a slot-aligned address inside a live slab;
                // reset's contract says no slot is in use anymore.
                unsafe {
                    let slot = addr as *mut FreeSlot;
                    (*slot).next = inner.free_head.get();
                    inner.free_head.set(slot);
                }
                inner.free_len.set(inner.free_len.get() + 1);
                addr += inner.slot_size;
            }
        }

        // The bump path is exhausted; everything flows through the free list.
        inner.cursor.set(inner.limit.get());
        inner.live.set(0);
    }

    fn can_reset(&self) -> bool {
        true
    }
}

impl StatisticsProvider for PoolAllocator {
    fn statistics(&self) -> AllocatorStats {
        self.inner.stats.snapshot()
    }

    fn reset_statistics(&self) {
        self.inner.stats.reset();
    }
}

impl core::fmt::Debug for PoolAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("slot_size", &self.slot_size())
            .field("slabs", &self.slab_count())
            .field("live_slots", &self.live_slots())
            .field("free_slots", &self.free_slots())
            .finish()
    }
}

impl Clone for PoolAllocator {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl PartialEq for PoolAllocator {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for PoolAllocator {}

impl Drop for PoolInner {
    fn drop(&mut self) {
        // Release slabs in reverse-acquisition order, newest first.
        for slab in self.slabs.get_mut().drain(..).rev() {
            drop(slab);
        }
    }
}
