//! # stratalloc
//!
//! Interchangeable low-level allocation strategies behind one contract.
//!
//! Four classic memory-management algorithms, each with its own
//! fragmentation, locality and reuse trade-offs, all exposing the same
//! allocation interface so generic containers can be parameterized over any
//! of them:
//!
//! - [`ArenaAllocator`](allocator::ArenaAllocator): bump-pointer arena with
//!   O(1) allocation and bulk-only reclamation
//! - [`PoolAllocator`](allocator::PoolAllocator): fixed-slot pool with slab
//!   growth, O(1) alloc/free for same-sized objects
//! - [`SegregatedAllocator`](allocator::SegregatedAllocator): power-of-two
//!   size classes over 64 KiB slabs, large objects bypassing the pools
//! - [`FreeListAllocator`](allocator::FreeListAllocator): sbrk-style
//!   first-fit free list with no splitting and no coalescing
//!
//! ## Quick start
//!
//! ```
//! use stratalloc::prelude::*;
//!
//! let arena = ArenaAllocator::new(4096)?;
//!
//! // The element-typed view: storage for 8 contiguous u32s.
//! let ptr = unsafe { arena.alloc_array::<u32>(8)? };
//! unsafe {
//!     for i in 0..8 {
//!         ptr.as_ptr().add(i).write(i as u32);
//!     }
//! }
//!
//! // Arena frees are no-ops; reset reclaims everything at once.
//! unsafe { arena.dealloc_array(ptr, 8) };
//! unsafe { arena.reset() };
//! # Ok::<(), stratalloc::AllocError>(())
//! ```
//!
//! ## Single-threaded by design
//!
//! No strategy synchronizes its internal state. Handles use `Rc` and
//! `Cell`-based bookkeeping, so they are `!Send` and `!Sync`; sharing across
//! threads requires an external synchronization wrapper, which this crate
//! deliberately does not provide.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(rust_2018_idioms)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
// Error docs live on AllocError itself
#![allow(clippy::missing_errors_doc)]
// inline(always) on the alignment helpers is intentional for hot paths
#![allow(clippy::inline_always)]
// Pointer/usize round trips are the currency of an allocator crate
#![allow(clippy::cast_possible_truncation)]

pub mod allocator;
pub mod error;
pub mod heap;
pub mod util;

pub use crate::error::{AllocError, AllocResult};

/// Convenient re-exports of commonly used types and traits.
pub mod prelude {
    pub use crate::allocator::{
        Allocator, AllocatorStats, ArenaAllocator, FreeListAllocator, MemoryUsage, PoolAllocator,
        PoolConfig, Resettable, SegregatedAllocator, StatisticsProvider, TypedAllocator,
    };
    pub use crate::error::{AllocError, AllocResult};
    pub use crate::heap::{HeapSource, SystemHeap};

    #[cfg(unix)]
    pub use crate::heap::ProcessHeap;
}
