//! # STATS — aggregate counters and the on-demand free-list walk
//!
//! Every field here is touched only while a scheme's `SpinLock` is held
//! (i.e. inside its `CRITSEC`), so plain `usize` counters are sufficient —
//! there is no cross-task races to guard against beyond what the lock
//! already provides.

/// Snapshot returned by `get_heap_stats`, matching `HeapStats_t` in the
/// allocator this crate generalizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Size of the largest free region currently on the list.
    pub largest_free: usize,
    /// Size of the smallest free region currently on the list.
    pub smallest_free: usize,
    /// Number of free regions on the list.
    pub free_blocks: usize,
    /// Bytes currently available for allocation (`free_bytes`).
    pub available_bytes: usize,
    /// Total number of successful `allocate`/`calloc` calls so far.
    pub alloc_count: usize,
    /// Total number of successful `free` calls so far.
    pub free_count: usize,
    /// The lowest `available_bytes` has ever been since initialization.
    pub min_ever_free: usize,
}

/// Counters threaded through a scheme's locked state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    pub free_bytes: usize,
    pub min_ever_free: usize,
    pub alloc_count: usize,
    pub free_count: usize,
}

impl Counters {
    /// Reset all counters to reflect a freshly initialized heap of
    /// `initial_free_bytes` bytes.
    pub const fn init(&mut self, initial_free_bytes: usize) {
        self.free_bytes = initial_free_bytes;
        self.min_ever_free = initial_free_bytes;
        self.alloc_count = 0;
        self.free_count = 0;
    }

    /// Record a successful allocation of `region_size` bytes (header
    /// included), updating the watermark.
    pub const fn record_alloc(&mut self, region_size: usize) {
        self.free_bytes -= region_size;
        if self.free_bytes < self.min_ever_free {
            self.min_ever_free = self.free_bytes;
        }
        self.alloc_count += 1;
    }

    /// Record a region of `region_size` bytes returning to the free pool.
    pub const fn record_free(&mut self, region_size: usize) {
        self.free_bytes += region_size;
        self.free_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_is_non_increasing_across_allocations() {
        let mut c = Counters::default();
        c.init(1024);
        c.record_alloc(256);
        assert_eq!(c.free_bytes, 768);
        assert_eq!(c.min_ever_free, 768);

        c.record_free(256);
        assert_eq!(c.free_bytes, 1024);
        assert_eq!(c.min_ever_free, 768, "watermark must not recover on free");

        c.record_alloc(900);
        assert_eq!(c.min_ever_free, 124);
    }
}
