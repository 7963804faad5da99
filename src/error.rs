//! Allocation error types.
//!
//! Uses thiserror for clean, idiomatic error definitions. Every failure an
//! allocator can report is synchronous and lands in [`AllocError`]; internal
//! consistency violations (a pointer that no slab owns) are *not* errors and
//! panic instead, because they indicate caller misuse or memory corruption
//! with no defined recovery.

use core::alloc::Layout;

use thiserror::Error;

#[cfg(feature = "logging")]
use tracing::warn;

/// Errors reported by the allocation strategies.
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// The general heap refused to provide backing memory.
    #[error("allocation failed: {size} bytes with {align} byte alignment")]
    AllocationFailed { size: usize, align: usize },

    /// Arithmetic overflow while computing a request size.
    #[error("size overflow during {operation}")]
    SizeOverflow { operation: &'static str },

    /// The requested alignment cannot be honored by this strategy.
    #[error("unsupported alignment: {alignment}")]
    InvalidAlignment { alignment: usize },

    /// The request is larger than this strategy can ever serve.
    #[error("request of {size} bytes exceeds maximum of {max_size}")]
    ExceedsMaxSize { size: usize, max_size: usize },

    /// The arena region has no room left; only `reset()` can recover.
    #[error("arena exhausted: requested {requested} bytes, {available} available")]
    ArenaExhausted { requested: usize, available: usize },

    /// The heap-extension primitive failed to grow the heap.
    #[error("heap extension failed: requested {requested} bytes")]
    HeapExhausted { requested: usize },
}

impl AllocError {
    /// Whether retrying can ever succeed without caller intervention.
    ///
    /// Arena exhaustion is only recoverable through `reset()`; heap
    /// exhaustion through freeing blocks. The remaining variants describe
    /// requests that will fail identically every time.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ArenaExhausted { .. } | Self::HeapExhausted { .. }
        )
    }

    /// Stable error code for categorization.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AllocationFailed { .. } => "ALLOC:FAILED",
            Self::SizeOverflow { .. } => "ALLOC:OVERFLOW",
            Self::InvalidAlignment { .. } => "ALLOC:ALIGN",
            Self::ExceedsMaxSize { .. } => "ALLOC:MAX",
            Self::ArenaExhausted { .. } => "ARENA:EXHAUSTED",
            Self::HeapExhausted { .. } => "HEAP:EXHAUSTED",
        }
    }

    /// Create an allocation failed error.
    pub fn allocation_failed(size: usize, align: usize) -> Self {
        #[cfg(feature = "logging")]
        warn!(size, align, "allocation failed");

        Self::AllocationFailed { size, align }
    }

    /// Create an allocation failed error from a layout.
    #[must_use]
    pub fn allocation_failed_with_layout(layout: Layout) -> Self {
        Self::allocation_failed(layout.size(), layout.align())
    }

    /// Create a size overflow error.
    #[must_use]
    pub fn size_overflow(operation: &'static str) -> Self {
        Self::SizeOverflow { operation }
    }

    /// Create an invalid alignment error.
    #[must_use]
    pub fn invalid_alignment(alignment: usize) -> Self {
        Self::InvalidAlignment { alignment }
    }

    /// Create an over-maximum-size error.
    #[must_use]
    pub fn exceeds_max_size(size: usize, max_size: usize) -> Self {
        Self::ExceedsMaxSize { size, max_size }
    }

    /// Create an arena exhausted error.
    pub fn arena_exhausted(requested: usize, available: usize) -> Self {
        #[cfg(feature = "logging")]
        warn!(requested, available, "arena exhausted");

        Self::ArenaExhausted {
            requested,
            available,
        }
    }

    /// Create a heap extension failure.
    pub fn heap_exhausted(requested: usize) -> Self {
        #[cfg(feature = "logging")]
        warn!(requested, "heap extension failed");

        Self::HeapExhausted { requested }
    }
}

/// Result type for allocation operations.
pub type AllocResult<T> = core::result::Result<T, AllocError>;
