//! Allocation statistics.
//!
//! Counters are plain `Cell`s rather than atomics: the strategies are
//! single-threaded by contract, so there is nothing to synchronize and the
//! bookkeeping stays branch-free on the hot paths.

use core::cell::Cell;

/// Snapshot of an allocator's activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Number of successful allocations.
    pub allocation_count: usize,
    /// Number of deallocations.
    pub deallocation_count: usize,
    /// Number of failed allocation attempts.
    pub failed_allocations: usize,
    /// Bytes currently allocated.
    pub allocated_bytes: usize,
    /// High-water mark of `allocated_bytes`.
    pub peak_allocated_bytes: usize,
    /// Cumulative bytes handed out over the allocator's lifetime.
    pub total_bytes_allocated: usize,
}

/// Types that expose allocation statistics.
pub trait StatisticsProvider {
    /// Current statistics snapshot.
    fn statistics(&self) -> AllocatorStats;

    /// Resets all counters to zero.
    fn reset_statistics(&self);
}

/// Internal counter set held by each strategy.
#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    allocations: Cell<usize>,
    deallocations: Cell<usize>,
    failures: Cell<usize>,
    live_bytes: Cell<usize>,
    peak_bytes: Cell<usize>,
    total_bytes: Cell<usize>,
}

impl StatCounters {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_alloc(&self, bytes: usize) {
        self.allocations.set(self.allocations.get() + 1);
        self.total_bytes.set(self.total_bytes.get().saturating_add(bytes));

        let live = self.live_bytes.get().saturating_add(bytes);
        self.live_bytes.set(live);
        if live > self.peak_bytes.get() {
            self.peak_bytes.set(live);
        }
    }

    pub(crate) fn record_dealloc(&self, bytes: usize) {
        self.deallocations.set(self.deallocations.get() + 1);
        self.live_bytes.set(self.live_bytes.get().saturating_sub(bytes));
    }

    pub(crate) fn record_failure(&self) {
        self.failures.set(self.failures.get() + 1);
    }

    pub(crate) fn snapshot(&self) -> AllocatorStats {
        AllocatorStats {
            allocation_count: self.allocations.get(),
            deallocation_count: self.deallocations.get(),
            failed_allocations: self.failures.get(),
            allocated_bytes: self.live_bytes.get(),
            peak_allocated_bytes: self.peak_bytes.get(),
            total_bytes_allocated: self.total_bytes.get(),
        }
    }

    pub(crate) fn reset(&self) {
        self.allocations.set(0);
        self.deallocations.set(0);
        self.failures.set(0);
        self.live_bytes.set(0);
        self.peak_bytes.set(0);
        self.total_bytes.set(0);
    }
}
