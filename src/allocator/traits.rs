//! The allocation contract every strategy satisfies.
//!
//! The system is built around a small set of traits:
//! - [`Allocator`]: layout-based allocation and deallocation
//! - [`TypedAllocator`]: the element-typed view generic containers consume
//! - [`MemoryUsage`]: resource accounting without OS introspection
//! - [`Resettable`]: bulk reclamation for strategies that support it
//!
//! # Safety
//!
//! `Allocator` is an unsafe trait: implementors guarantee that returned
//! pointers are valid, exclusive, and aligned as requested, and callers
//! guarantee that deallocation parameters match a prior live allocation from
//! the *same* allocator (or one equal to it). Passing a foreign pointer is
//! undefined behavior; no strategy detects it.
//!
//! # Zero-sized requests
//!
//! Every strategy serves zero-sized requests with a well-aligned dangling
//! pointer and treats their deallocation as a no-op. A null pointer is never
//! returned.

use core::alloc::Layout;
use core::ptr::{self, NonNull};

use crate::error::{AllocError, AllocResult};

/// Layout-based allocator interface.
///
/// # Safety
///
/// Implementors must ensure that:
/// - Returned pointers are valid for reads and writes of `layout.size()`
///   bytes and aligned to `layout.align()`
/// - Deallocation only touches memory previously returned by this allocator
///   (or an equal handle to the same strategy state)
/// - Failure is reported as an `Err`, never as a null or dangling pointer
///   masquerading as a real allocation
pub unsafe trait Allocator {
    /// Allocates memory for the given layout.
    ///
    /// # Safety
    /// The returned memory is uninitialized; the caller must initialize it
    /// before reading and must not use it past deallocation, reset, or
    /// teardown of the owning strategy.
    ///
    /// # Errors
    /// Strategy-specific: capacity exhaustion, heap-extension failure, or a
    /// request the strategy cannot represent.
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>>;

    /// Releases memory previously obtained from [`allocate`](Self::allocate).
    ///
    /// # Safety
    /// - `ptr` must come from this allocator (or an equal handle) with this
    ///   exact `layout`
    /// - `ptr` must not be used after this call
    /// - Double-free is undefined behavior
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Allocates zero-filled memory.
    ///
    /// # Safety
    /// Same contract as [`allocate`](Self::allocate); the returned bytes are
    /// initialized to zero.
    unsafe fn allocate_zeroed(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        // SAFETY: forwarding the caller's contract.
        let ptr = unsafe { self.allocate(layout)? };
        // SAFETY: ptr is valid for writes of layout.size() bytes.
        unsafe { ptr::write_bytes(ptr.as_ptr().cast::<u8>(), 0, layout.size()) };
        Ok(ptr)
    }

    /// Resizes an allocation, preserving its contents up to the smaller of
    /// the two sizes.
    ///
    /// The default moves the data: allocate new, copy, release old.
    /// Strategies override this when they can resize in place (the pool when
    /// the new layout still fits the slot, the free list when the block's
    /// declared size already covers the request).
    ///
    /// # Safety
    /// - `ptr` and `old_layout` must match a prior live allocation
    /// - On success the old pointer is invalid and must not be used
    ///
    /// # Errors
    /// Same failure modes as [`allocate`](Self::allocate).
    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> AllocResult<NonNull<[u8]>> {
        if old_layout.size() == new_layout.size() && old_layout.align() >= new_layout.align() {
            return Ok(NonNull::slice_from_raw_parts(ptr, new_layout.size()));
        }

        // SAFETY: forwarding the caller's contract.
        let new_ptr = unsafe { self.allocate(new_layout)? };

        let copy = old_layout.size().min(new_layout.size());
        if copy > 0 {
            // SAFETY: source is valid for copy bytes (caller contract), the
            // destination was just allocated with at least copy bytes, and
            // the two allocations are distinct.
            unsafe {
                ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr().cast::<u8>(), copy);
            }
        }

        // SAFETY: ptr/old_layout match the original allocation (caller
        // contract) and its contents have been moved.
        unsafe { self.deallocate(ptr, old_layout) };
        Ok(new_ptr)
    }
}

/// Element-typed allocation, the contract generic containers consume.
///
/// `alloc_array::<T>(count)` is "allocate storage for `count` contiguous
/// elements, suitably aligned for `T`"; `dealloc_array` is its inverse with
/// the same count. Rebinding is inherent: one allocator value serves any
/// element type through these methods, drawing from the same underlying
/// strategy state. A container that stores `T`s but allocates its own node
/// type simply calls `alloc_typed::<Node<T>>()` on the same allocator.
pub trait TypedAllocator: Allocator {
    /// Allocates uninitialized storage for a single `T`.
    ///
    /// # Safety
    /// Initialize before reading; release with
    /// [`dealloc_typed`](Self::dealloc_typed).
    #[inline]
    unsafe fn alloc_typed<T>(&self) -> AllocResult<NonNull<T>> {
        let layout = Layout::new::<T>();
        // SAFETY: layout comes from the type and is always valid.
        let ptr = unsafe { self.allocate(layout)? };
        Ok(ptr.cast())
    }

    /// Allocates storage for a single `T` and moves `value` into it.
    ///
    /// # Safety
    /// Release with [`dealloc_typed`](Self::dealloc_typed); if `T` needs
    /// dropping, drop it in place first.
    #[inline]
    unsafe fn alloc_init<T>(&self, value: T) -> AllocResult<NonNull<T>> {
        // SAFETY: forwarding the caller's contract.
        let ptr = unsafe { self.alloc_typed::<T>()? };
        // SAFETY: ptr was just allocated with T's layout and is exclusive.
        unsafe { ptr.as_ptr().write(value) };
        Ok(ptr)
    }

    /// Allocates uninitialized storage for `count` contiguous `T`s.
    ///
    /// # Safety
    /// Initialize elements before reading; release with
    /// [`dealloc_array`](Self::dealloc_array) passing the same count.
    ///
    /// # Errors
    /// [`AllocError::SizeOverflow`] if `count * size_of::<T>()` overflows,
    /// otherwise the strategy's own failure modes.
    #[inline]
    unsafe fn alloc_array<T>(&self, count: usize) -> AllocResult<NonNull<T>> {
        if count == 0 {
            return Ok(NonNull::dangling());
        }

        let layout =
            Layout::array::<T>(count).map_err(|_| AllocError::size_overflow("array layout"))?;
        // SAFETY: forwarding the caller's contract.
        let ptr = unsafe { self.allocate(layout)? };
        Ok(ptr.cast())
    }

    /// Releases storage obtained from [`alloc_typed`](Self::alloc_typed) or
    /// [`alloc_init`](Self::alloc_init).
    ///
    /// # Safety
    /// `ptr` must come from this allocator with element type `T` and must
    /// not be used afterwards. Does not run `T`'s destructor.
    #[inline]
    unsafe fn dealloc_typed<T>(&self, ptr: NonNull<T>) {
        // SAFETY: layout matches the original allocation by construction.
        unsafe { self.deallocate(ptr.cast(), Layout::new::<T>()) }
    }

    /// Releases storage obtained from [`alloc_array`](Self::alloc_array)
    /// with the same `count`.
    ///
    /// # Safety
    /// `ptr` and `count` must match the original allocation; `ptr` must not
    /// be used afterwards. Does not run destructors.
    #[inline]
    unsafe fn dealloc_array<T>(&self, ptr: NonNull<T>, count: usize) {
        if count == 0 {
            return;
        }

        let layout = Layout::array::<T>(count).expect("layout was valid at allocation time");
        // SAFETY: layout matches the original allocation (caller contract).
        unsafe { self.deallocate(ptr.cast(), layout) }
    }
}

/// Every allocator gets the element-typed view for free.
impl<A: Allocator + ?Sized> TypedAllocator for A {}

/// Memory accounting for a strategy's own bookkeeping.
///
/// Figures come from the allocator's internal state, never from OS process
/// introspection; they are what the leak-per-cycle properties are asserted
/// against.
pub trait MemoryUsage {
    /// Bytes currently handed out to callers.
    fn used_memory(&self) -> usize;

    /// Bytes still available, where the strategy has a fixed budget.
    fn available_memory(&self) -> Option<usize>;

    /// Total capacity, where the strategy has a fixed budget.
    fn total_memory(&self) -> Option<usize>;
}

/// Bulk reclamation.
pub trait Resettable {
    /// Returns the strategy to its post-construction state.
    ///
    /// # Safety
    /// Every pointer previously issued by this allocator becomes invalid;
    /// the caller guarantees none is used again.
    unsafe fn reset(&self);

    /// Whether this strategy supports reset at all.
    fn can_reset(&self) -> bool {
        false
    }
}

/// Borrowed proxies forward the whole contract.
///
/// # Safety
/// Pure delegation: every call forwards to the underlying `T: Allocator`,
/// preserving its safety contract unchanged.
unsafe impl<T: Allocator + ?Sized> Allocator for &T {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        // SAFETY: forwarding the caller's contract.
        unsafe { (**self).allocate(layout) }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: forwarding the caller's contract.
        unsafe { (**self).deallocate(ptr, layout) }
    }

    unsafe fn allocate_zeroed(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        // SAFETY: forwarding the caller's contract.
        unsafe { (**self).allocate_zeroed(layout) }
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> AllocResult<NonNull<[u8]>> {
        // SAFETY: forwarding the caller's contract.
        unsafe { (**self).reallocate(ptr, old_layout, new_layout) }
    }
}

impl<T: MemoryUsage + ?Sized> MemoryUsage for &T {
    fn used_memory(&self) -> usize {
        (**self).used_memory()
    }

    fn available_memory(&self) -> Option<usize> {
        (**self).available_memory()
    }

    fn total_memory(&self) -> Option<usize> {
        (**self).total_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::ArenaAllocator;

    #[test]
    fn typed_view_round_trips_values() {
        let arena = ArenaAllocator::new(1024).unwrap();

        // SAFETY: arena outlives the pointer; value is written before read.
        unsafe {
            let ptr = arena.alloc_init(0xDEAD_BEEF_u64).unwrap();
            assert_eq!(*ptr.as_ptr(), 0xDEAD_BEEF);
            arena.dealloc_typed(ptr);
        }
    }

    #[test]
    fn zero_count_array_is_dangling_and_free() {
        let arena = ArenaAllocator::new(64).unwrap();

        // SAFETY: zero-sized contract; nothing is read or written.
        unsafe {
            let ptr = arena.alloc_array::<u64>(0).unwrap();
            assert_eq!(ptr, NonNull::dangling());
            arena.dealloc_array(ptr, 0);
        }
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn array_overflow_is_an_error() {
        let arena = ArenaAllocator::new(64).unwrap();
        // SAFETY: the call fails before any memory is touched.
        let err = unsafe { arena.alloc_array::<u64>(usize::MAX / 4) }.unwrap_err();
        assert_eq!(err.code(), "ALLOC:OVERFLOW");
    }

    #[test]
    fn allocate_zeroed_zeroes() {
        let arena = ArenaAllocator::new(1024).unwrap();
        let layout = Layout::from_size_align(64, 8).unwrap();

        // SAFETY: layout is valid and the arena has capacity.
        unsafe {
            let ptr = arena.allocate_zeroed(layout).unwrap();
            let bytes = core::slice::from_raw_parts(ptr.as_ptr().cast::<u8>(), 64);
            assert!(bytes.iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn borrowed_proxy_allocates_from_the_same_state() {
        let arena = ArenaAllocator::new(1024).unwrap();
        let proxy = &arena;

        // SAFETY: both handles refer to the same live arena.
        unsafe {
            let a = Allocator::allocate(&proxy, Layout::new::<u32>()).unwrap();
            let b = arena.allocate(Layout::new::<u32>()).unwrap();
            assert_eq!(
                a.as_ptr().cast::<u8>() as usize + 4,
                b.as_ptr().cast::<u8>() as usize
            );
        }
    }
}
