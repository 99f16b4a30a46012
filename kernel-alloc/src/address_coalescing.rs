//! # SCHEME-ADDRESS-COALESCING — an address-sorted free list with merging
//!
//! Free regions are kept on a singly-linked list ordered by ascending
//! address, anchored at a synthetic `START` sentinel (`size == 0`, not part
//! of the backing buffer) and terminated by a real `END` header placed at
//! the top of the usable heap (`size == 0`, `next_free == NIL`). Every
//! region returned to the free list is merged with an address-adjacent
//! free neighbor on either side, so the free list never carries two
//! physically contiguous free regions — the central difference from
//! [`crate::size_ordered`].
//!
//! Grounded on `heap_4.c`'s `BlockLink_t` free list,
//! `prvInsertBlockIntoFreeList`'s predecessor/successor merge, and
//! `vPortGetHeapStats`.

use kernel_sync::SpinLock;

use crate::arith;
use crate::critsec::{NullScheduler, Scheduler, SuspendGuard};
use crate::error::AllocError;
use crate::header::{RegionHeader, header_size_aligned, min_block};
use crate::hooks::{NoopOomHook, NoopTraceHooks, OomHook, TraceHooks};
use crate::port::HeapStorage;
use crate::stats::{Counters, HeapStats};

struct State {
    base: Option<*mut u8>,
    usable: usize,
    initialized: bool,
    out_of_memory: bool,
    /// `size == 0`; `next_free` is the lowest-addressed free region, or
    /// `END` if none remain. Synthetic — not part of the backing buffer.
    start: RegionHeader,
    /// A real header inside the backing buffer, at its top. `size == 0`,
    /// `next_free == NIL`, never merged into and never unlinked.
    end_ptr: Option<*mut RegionHeader>,
    counters: Counters,
}

impl State {
    const fn new() -> Self {
        Self {
            base: None,
            usable: 0,
            initialized: false,
            out_of_memory: false,
            start: RegionHeader::new_free(0),
            end_ptr: None,
            counters: Counters {
                free_bytes: 0,
                min_ever_free: 0,
                alloc_count: 0,
                free_count: 0,
            },
        }
    }

    fn start_ptr(&mut self) -> *mut RegionHeader {
        &raw mut self.start
    }
}

/// An address-ordered, coalescing free-list heap over storage `S`.
///
/// # Safety (not an `unsafe` item, but load-bearing)
/// Must not move in memory once a call has reached it, for the same reason
/// as [`crate::size_ordered::SizeOrderedHeap`]: `START` is addressed by raw
/// pointers threaded through the free list.
pub struct AddressCoalescingHeap<S, Sch = NullScheduler, Oom = NoopOomHook, Trace = NoopTraceHooks>
where
    S: HeapStorage,
    Sch: Scheduler,
    Oom: OomHook,
    Trace: TraceHooks,
{
    storage: S,
    scheduler: Sch,
    oom: Oom,
    trace: Trace,
    state: SpinLock<State>,
}

impl<S, Sch, Oom, Trace> AddressCoalescingHeap<S, Sch, Oom, Trace>
where
    S: HeapStorage,
    Sch: Scheduler,
    Oom: OomHook,
    Trace: TraceHooks,
{
    /// Build a heap over `storage`, suspending `scheduler` around every
    /// structural access and invoking `oom`/`trace` outside the critical
    /// section as configured.
    #[must_use]
    pub const fn new(storage: S, scheduler: Sch, oom: Oom, trace: Trace) -> Self {
        Self {
            storage,
            scheduler,
            oom,
            trace,
            state: SpinLock::new(State::new()),
        }
    }

    fn ensure_init(&self, state: &mut State) {
        if state.initialized {
            return;
        }
        state.initialized = true;

        let (start, len) = self.storage.region();
        let align = S::ALIGNMENT;
        let raw_start = start.as_ptr().addr();
        let Some(aligned_addr) = arith::align_up(raw_start, align) else {
            state.out_of_memory = true;
            return;
        };
        let lost_to_alignment = aligned_addr - raw_start;
        if lost_to_alignment > len {
            state.out_of_memory = true;
            return;
        }
        let usable = arith::align_down(len - lost_to_alignment, align);
        let header = header_size_aligned(align);

        if usable < min_block(align) + header {
            state.out_of_memory = true;
            return;
        }

        // Safety: within the storage region, inherits `start`'s provenance.
        let base = unsafe { start.as_ptr().add(lost_to_alignment) };
        let end_addr = arith::align_down(base.addr() + usable - header, align);
        let region_size = end_addr - base.addr();

        // Safety: `end_addr` lies within `[base, base + usable)` and is
        // `align`-aligned with room for one header.
        let end_ptr: *mut RegionHeader = unsafe { base.add(end_addr - base.addr()).cast() };
        unsafe { end_ptr.write(RegionHeader::new_free(0)) };

        let region_ptr = base.cast::<RegionHeader>();
        // Safety: `base` is `align`-aligned and `region_size >= MIN_BLOCK`.
        unsafe {
            region_ptr.write(RegionHeader::new_free(region_size));
            (*region_ptr).set_next_free(end_ptr);
        }

        state.start = RegionHeader::new_free(0);
        state.start.set_next_free(region_ptr);

        state.base = Some(base);
        state.usable = usable;
        state.end_ptr = Some(end_ptr);
        state.counters.init(region_size);
    }

    /// `insert(region)` (spec.md §4.3, SCHEME-ADDRESS-COALESCING): splice
    /// `region` into the address-ordered free list, merging with whichever
    /// of its address-adjacent neighbors (predecessor, successor, or both)
    /// happen to be free. `END` is never merged into.
    fn insert(state: &mut State, region: *mut RegionHeader) {
        let end_ptr = state.end_ptr.expect("heap initialized");
        let region_addr = region.addr();
        // Safety: `region` was just written as a valid free header.
        let region_size = unsafe { (*region).size() };

        let mut cursor = state.start_ptr();
        loop {
            // Safety: every node reachable from `start` is a live header.
            let next = unsafe { (*cursor).next_free() };
            if next.addr() < region_addr {
                cursor = next;
            } else {
                break;
            }
        }

        let cursor_addr = cursor.addr();
        // Safety: `cursor` is START or a live free header.
        let cursor_size = unsafe { (*cursor).size() };
        let mut r = region;
        if cursor_addr + cursor_size == region_addr {
            // Safety: `cursor` is a live free header distinct from `region`.
            unsafe { (*cursor).set_size(cursor_size + region_size) };
            r = cursor;
        }

        // Safety: `cursor` is a live header.
        let successor = unsafe { (*cursor).next_free() };
        let r_addr = r.addr();
        // Safety: `r` is `cursor` or `region`, both live free headers.
        let r_size = unsafe { (*r).size() };
        if successor != end_ptr && r_addr + r_size == successor.addr() {
            // Safety: `successor` is a live free header, not END.
            let successor_size = unsafe { (*successor).size() };
            let successor_next = unsafe { (*successor).next_free() };
            unsafe {
                (*r).set_size(r_size + successor_size);
                (*r).set_next_free(successor_next);
            }
        } else {
            // Safety: `r` is a live header; `successor` stays valid (END or
            // a non-adjacent free region) either way.
            unsafe { (*r).set_next_free(successor) };
        }

        if !core::ptr::eq(r, cursor) {
            // Safety: `cursor` is a live header.
            unsafe { (*cursor).set_next_free(r) };
        }
    }

    fn allocate_locked(&self, state: &mut State, requested: usize) -> Result<*mut u8, AllocError> {
        self.ensure_init(state);
        if state.out_of_memory {
            return Err(AllocError::StorageTooSmall);
        }

        let align = S::ALIGNMENT;
        let header = header_size_aligned(align);
        let Some((_adjusted, need)) = arith::normalize_request(requested, align, header) else {
            return Err(if requested == 0 { AllocError::ZeroSized } else { AllocError::TooLarge });
        };
        if need > state.counters.free_bytes {
            return Err(AllocError::OutOfMemory);
        }

        let end_ptr = state.end_ptr.expect("checked by out_of_memory above");
        let mut prev = state.start_ptr();
        let region = loop {
            // Safety: `prev` is always a live header (START or a real region).
            let cur = unsafe { (*prev).next_free() };
            if cur == end_ptr {
                return Err(AllocError::OutOfMemory);
            }
            // Safety: `cur` is not END, so it is a real, live free header.
            if unsafe { (*cur).size() } >= need {
                break cur;
            }
            prev = cur;
        };

        // Unlink.
        // Safety: `region` is reachable and `prev` precedes it.
        unsafe { (*prev).set_next_free((*region).next_free()) };

        let region_size = unsafe { (*region).size() };

        if region_size - need >= min_block(align) {
            // Safety: `need` bytes from `region`'s address were validated by
            // the free-list search above to lie within this free region.
            let remainder: *mut RegionHeader = unsafe { region.cast::<u8>().add(need).cast() };
            let remainder_size = region_size - need;
            // Safety: `remainder` is `align`-aligned and large enough.
            unsafe { remainder.write(RegionHeader::new_free(remainder_size)) };
            Self::insert(state, remainder);
            // Safety: `region` is still a valid header (only its size changes).
            unsafe { (*region).set_size(need) };
        }

        // Safety: `region` is exclusively ours now that it is unlinked.
        unsafe {
            (*region).mark_allocated();
            (*region).set_next_free(core::ptr::null_mut());
        }
        let final_size = unsafe { (*region).size() };
        state.counters.record_alloc(final_size);

        // Safety: payload starts `header` bytes after the region header.
        Ok(unsafe { region.cast::<u8>().add(header) })
    }

    /// Claim `requested` bytes from the first free region (in address
    /// order) large enough to hold it, splitting it if the remainder would
    /// still be at least `MIN_BLOCK`.
    ///
    /// Returns `NIL` (a null pointer) on any failure.
    pub fn allocate(&self, requested: usize) -> *mut u8 {
        self.try_allocate(requested).unwrap_or(core::ptr::null_mut())
    }

    /// As [`AddressCoalescingHeap::allocate`], but distinguishes the
    /// failure reason.
    pub fn try_allocate(&self, requested: usize) -> Result<*mut u8, AllocError> {
        let result = {
            let _guard = SuspendGuard::new(&self.scheduler);
            self.state.with_lock(|state| self.allocate_locked(state, requested))
        };

        match result {
            Ok(p) => {
                #[cfg(feature = "trace")]
                self.trace.trace_malloc(p, requested);
                #[cfg(not(feature = "trace"))]
                let _ = &self.trace;
                Ok(p)
            }
            Err(e) => {
                #[cfg(feature = "malloc-failed-hook")]
                self.oom.on_malloc_failed();
                #[cfg(not(feature = "malloc-failed-hook"))]
                let _ = &self.oom;
                Err(e)
            }
        }
    }

    /// Release a region previously returned by
    /// [`AddressCoalescingHeap::allocate`], merging it with any
    /// address-adjacent free neighbor.
    ///
    /// `ptr` may be `NIL`, in which case this is a no-op.
    ///
    /// # Panics
    /// Panics (spec.md §7 `CorruptedHeaderOnFree`) if the recovered header
    /// is not marked allocated, or has a non-`NIL` `next_free`.
    pub fn free(&self, ptr: *mut u8) {
        let Some(ptr) = core::ptr::NonNull::new(ptr) else {
            return;
        };
        let align = S::ALIGNMENT;
        let header = header_size_aligned(align);
        // Safety: a non-null `ptr` must have been returned by `allocate`.
        let header_ptr: *mut RegionHeader = unsafe { ptr.as_ptr().sub(header).cast() };

        // Safety: caught by the assertion below if `ptr` was not ours.
        let region = unsafe { &mut *header_ptr };
        assert!(region.is_allocated() && region.next_free().is_null(), "kernel-alloc: corrupted or double-freed header");

        region.mark_free();
        #[cfg(feature = "clear-on-free")]
        {
            let payload_len = region.size() - header;
            // Safety: `payload_len` bytes starting at `ptr` belong to this
            // region's payload, which is exclusively ours again now that it
            // is marked free.
            unsafe { core::ptr::write_bytes(ptr.as_ptr(), 0, payload_len) };
        }

        let size = region.size();
        {
            let _guard = SuspendGuard::new(&self.scheduler);
            self.state.with_lock(|state| {
                state.counters.record_free(size);
                Self::insert(state, header_ptr);
            });
        }

        #[cfg(feature = "trace")]
        self.trace.trace_free(ptr.as_ptr(), size - header);
        #[cfg(not(feature = "trace"))]
        let _ = &self.trace;
    }

    /// `calloc(n, size)`: like [`AddressCoalescingHeap::allocate`], but
    /// zero-initializes the region and checks `n * size` for overflow
    /// first.
    pub fn calloc(&self, n: usize, size: usize) -> *mut u8 {
        self.try_calloc(n, size).unwrap_or(core::ptr::null_mut())
    }

    /// As [`AddressCoalescingHeap::calloc`], but distinguishes the failure
    /// reason.
    pub fn try_calloc(&self, n: usize, size: usize) -> Result<*mut u8, AllocError> {
        let total = arith::checked_mul(n, size).ok_or(AllocError::CallocOverflow)?;
        let p = self.try_allocate(total)?;
        // Safety: `try_allocate` returned a region of at least `total`
        // writable bytes when it returned `Ok`.
        unsafe { core::ptr::write_bytes(p, 0, total) };
        Ok(p)
    }

    /// Bytes currently available for allocation.
    #[must_use]
    pub fn free_heap_size(&self) -> usize {
        let _guard = SuspendGuard::new(&self.scheduler);
        self.state.with_lock(|state| {
            self.ensure_init(state);
            state.counters.free_bytes
        })
    }

    /// The lowest `free_heap_size()` has ever reported since initialization.
    #[must_use]
    pub fn min_ever_free_heap_size(&self) -> usize {
        let _guard = SuspendGuard::new(&self.scheduler);
        self.state.with_lock(|state| {
            self.ensure_init(state);
            state.counters.min_ever_free
        })
    }

    /// Walk the free list under a critical section, producing the
    /// largest/smallest free region sizes, the free-region count, and the
    /// running counters, all as of one consistent instant.
    #[must_use]
    pub fn get_heap_stats(&self) -> HeapStats {
        let _guard = SuspendGuard::new(&self.scheduler);
        self.state.with_lock(|state| {
            self.ensure_init(state);
            let Some(end_ptr) = state.end_ptr else {
                return HeapStats::default();
            };

            let mut largest = 0usize;
            let mut smallest = usize::MAX;
            let mut blocks = 0usize;
            let mut cursor = state.start_ptr();
            loop {
                // Safety: every node reachable from `start` is a live header.
                let next = unsafe { (*cursor).next_free() };
                if next == end_ptr {
                    break;
                }
                let size = unsafe { (*next).size() };
                largest = largest.max(size);
                smallest = smallest.min(size);
                blocks += 1;
                cursor = next;
            }
            if blocks == 0 {
                smallest = 0;
            }

            HeapStats {
                largest_free: largest,
                smallest_free: smallest,
                free_blocks: blocks,
                available_bytes: state.counters.free_bytes,
                alloc_count: state.counters.alloc_count,
                free_count: state.counters.free_count,
                min_ever_free: state.counters.min_ever_free,
            }
        })
    }

    /// No-op on this scheme; present only for call-site compatibility with
    /// [`crate::bump::BumpHeap::initialize_blocks`].
    pub fn initialize_blocks(&self) {}

    #[cfg(test)]
    fn debug_free_list_addrs(&self) -> Vec<usize> {
        self.state.with_lock(|state| {
            let end_ptr = state.end_ptr.unwrap();
            let mut out = Vec::new();
            let mut cursor = state.start_ptr();
            loop {
                let next = unsafe { (*cursor).next_free() };
                if next == end_ptr {
                    return out;
                }
                out.push(next.addr());
                cursor = next;
            }
        })
    }
}

// Safety: all mutable state lives behind `SpinLock`, and `S::region()` is
// guaranteed stable by `HeapStorage`'s contract.
unsafe impl<S, Sch, Oom, Trace> Sync for AddressCoalescingHeap<S, Sch, Oom, Trace>
where
    S: HeapStorage + Sync,
    Sch: Scheduler + Sync,
    Oom: OomHook + Sync,
    Trace: TraceHooks + Sync,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::StaticHeap;

    fn heap() -> AddressCoalescingHeap<StaticHeap<1024, 8>> {
        AddressCoalescingHeap::new(StaticHeap::new(), NullScheduler, NoopOomHook, NoopTraceHooks)
    }

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let h = heap();
        let a = h.allocate(48);
        let b = h.allocate(48);
        assert!(!a.is_null());
        assert!(!b.is_null());
        assert_eq!(a as usize % 8, 0);
        assert_eq!(b as usize % 8, 0);
    }

    #[test]
    fn freeing_adjacent_neighbors_coalesces_into_one_region() {
        let h = heap();
        let a = h.allocate(48);
        let b = h.allocate(48);
        let c = h.allocate(48);
        assert!(!a.is_null() && !b.is_null() && !c.is_null());

        h.free(b);
        assert_eq!(h.get_heap_stats().free_blocks, 2, "b's region plus the tail remainder");

        h.free(a);
        assert_eq!(h.get_heap_stats().free_blocks, 2, "a merges with b but not yet with the tail");

        h.free(c);
        let stats = h.get_heap_stats();
        assert_eq!(stats.free_blocks, 1, "freeing c should merge everything back into one region");
        assert_eq!(stats.largest_free, h.free_heap_size());
    }

    #[test]
    fn free_list_stays_address_ordered() {
        let h = heap();
        let a = h.allocate(16);
        let b = h.allocate(16);
        let c = h.allocate(16);
        h.free(c);
        h.free(a);
        h.free(b);
        let addrs = h.debug_free_list_addrs();
        let mut sorted = addrs.clone();
        sorted.sort_unstable();
        assert_eq!(addrs, sorted);
    }

    #[test]
    fn watermark_never_recovers() {
        let h = heap();
        let before = h.min_ever_free_heap_size();
        let p = h.allocate(256);
        assert!(!p.is_null());
        h.free(p);
        assert_eq!(h.free_heap_size(), before);
        assert!(h.min_ever_free_heap_size() < before);
    }

    #[test]
    #[should_panic]
    fn double_free_is_caught_by_assertion() {
        let h = heap();
        let p = h.allocate(16);
        h.free(p);
        h.free(p);
    }

    #[test]
    fn oversized_request_returns_out_of_memory() {
        let h = heap();
        assert_eq!(h.try_allocate(usize::MAX), Err(AllocError::TooLarge));
    }

    #[test]
    fn calloc_zeroes_the_region() {
        let h = heap();
        let p = h.calloc(16, 4);
        assert!(!p.is_null());
        let slice = unsafe { core::slice::from_raw_parts(p, 64) };
        assert!(slice.iter().all(|&b| b == 0));
    }
}
