//! Property-based tests for the invariants the strategies promise over
//! arbitrary request sequences.

use std::alloc::Layout;

use proptest::prelude::*;

use stratalloc::allocator::segregated::{block_size, class_index, SIZE_CLASSES};
use stratalloc::prelude::*;

proptest! {
    /// The class index never decreases as the request size grows.
    #[test]
    fn class_index_is_monotonic(a in 0usize..=1 << 20, b in 0usize..=1 << 20) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(class_index(lo) <= class_index(hi));
    }

    /// Any two sizes mapping to one class both fit that class's block size.
    #[test]
    fn pooled_sizes_fit_their_class_blocks(size in 1usize..=4096) {
        let class = class_index(size);
        prop_assert!(class < SIZE_CLASSES);
        prop_assert!(block_size(class) >= size);
        // The class is the *smallest* adequate one.
        if class > 0 {
            prop_assert!(block_size(class - 1) < size);
        }
    }

    /// Consecutive arena allocations are adjacent: each gap equals the
    /// previous request exactly, with no hidden padding.
    #[test]
    fn arena_gaps_equal_request_sizes(sizes in prop::collection::vec(1usize..=64, 1..32)) {
        let arena = ArenaAllocator::new(64 * 1024).unwrap();

        let mut previous: Option<(usize, usize)> = None;
        for &size in &sizes {
            let layout = Layout::from_size_align(size, 1).unwrap();
            // SAFETY: total requests stay far below capacity.
            let addr = unsafe { arena.allocate(layout) }
                .unwrap()
                .as_ptr()
                .cast::<u8>() as usize;

            if let Some((prev_addr, prev_size)) = previous {
                prop_assert_eq!(addr, prev_addr + prev_size);
            }
            previous = Some((addr, size));
        }

        prop_assert_eq!(arena.used_memory(), sizes.iter().sum::<usize>());
    }

    /// Pool free-then-allocate of the same size always returns the freed
    /// slot back, regardless of how many live slots surround it.
    #[test]
    fn pool_reuses_the_freed_slot(live_before in 0usize..16, live_after in 0usize..16) {
        let pool = PoolAllocator::for_type::<u64>();
        let layout = Layout::new::<u64>();

        // SAFETY: every pointer is released before the pool is dropped.
        unsafe {
            let mut held = Vec::new();
            for _ in 0..live_before {
                held.push(pool.allocate(layout).unwrap());
            }
            let victim = pool.allocate(layout).unwrap();
            for _ in 0..live_after {
                held.push(pool.allocate(layout).unwrap());
            }

            pool.deallocate(victim.cast(), layout);
            let reused = pool.allocate(layout).unwrap();
            prop_assert_eq!(victim.as_ptr().cast::<u8>(), reused.as_ptr().cast::<u8>());

            pool.deallocate(reused.cast(), layout);
            for ptr in held {
                pool.deallocate(ptr.cast(), layout);
            }
        }
    }

    /// Free-list round trips over arbitrary in-range sizes settle on one
    /// block: first-fit keeps reusing it, never extending.
    #[test]
    fn freelist_round_trips_settle(sizes in prop::collection::vec(1usize..=128, 1..64)) {
        let list = FreeListAllocator::new();

        // Prime with the largest request so every later one fits the block.
        let max = *sizes.iter().max().unwrap();
        let prime = Layout::from_size_align(max, 8).unwrap();
        // SAFETY: strict alloc/free pairing throughout.
        unsafe {
            let ptr = list.allocate(prime).unwrap();
            list.deallocate(ptr.cast(), prime);
        }

        for &size in &sizes {
            let layout = Layout::from_size_align(size, 8).unwrap();
            // SAFETY: strict alloc/free pairing.
            unsafe {
                let ptr = list.allocate(layout).unwrap();
                list.deallocate(ptr.cast(), layout);
            }
        }

        prop_assert_eq!(list.extension_count(), 1);
        prop_assert_eq!(list.block_count(), 1);
    }
}
