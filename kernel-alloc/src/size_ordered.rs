//! # SCHEME-SIZE-ORDERED — a size-sorted free list, no coalescing
//!
//! Free regions are kept on a singly-linked list ordered by ascending
//! `size`, anchored at a `START` sentinel (`size == 0`) and bounded by an
//! `END` sentinel whose recorded size equals the whole usable heap — large
//! enough that the ascending insert/search loops always terminate at it
//! without ever needing a separate "is this the last node" check. Because
//! the list is size-ordered, the first region found during a scan that is
//! large enough to satisfy a request is also the smallest such region:
//! first-fit and best-fit coincide by construction. Freed regions are
//! never merged with their address neighbors — that is what
//! [`crate::address_coalescing`] is for.
//!
//! Grounded on `heap_2.c`'s `xStart`/`pxEnd` free-list and
//! `prvInsertBlockIntoFreeList`.

use kernel_sync::SpinLock;

use crate::arith;
use crate::critsec::{NullScheduler, Scheduler, SuspendGuard};
use crate::error::AllocError;
use crate::header::{RegionHeader, header_size_aligned, min_block};
use crate::hooks::{NoopOomHook, NoopTraceHooks, OomHook, TraceHooks};
use crate::port::HeapStorage;
use crate::stats::Counters;

struct State {
    base: Option<*mut u8>,
    usable: usize,
    initialized: bool,
    out_of_memory: bool,
    /// `size == 0`; `next_free` is the smallest free region, or `END` if
    /// none remain.
    start: RegionHeader,
    /// `size == usable` (spec's "terminal sentinel"): never itself linked
    /// into anyone's `next_free`, only ever compared against by address to
    /// detect "no more real regions".
    end: RegionHeader,
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
            end: RegionHeader::new_free(0),
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

    fn end_ptr(&mut self) -> *mut RegionHeader {
        &raw mut self.end
    }
}

/// A size-ordered free-list heap over storage `S`.
///
/// # Safety (not an `unsafe` item, but load-bearing)
/// Like any intrusive linked structure, this heap must not move in memory
/// once a call has reached it: `START`/`END` are addressed by raw pointers
/// threaded through the free list. Place it in a `static`, or otherwise pin
/// it, before the first call.
pub struct SizeOrderedHeap<S, Sch = NullScheduler, Oom = NoopOomHook, Trace = NoopTraceHooks>
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

impl<S, Sch, Oom, Trace> SizeOrderedHeap<S, Sch, Oom, Trace>
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

        if usable < min_block(align) + header_size_aligned(align) {
            state.out_of_memory = true;
            return;
        }

        // Safety: within the storage region, inherits `start`'s provenance.
        let base = unsafe { start.as_ptr().add(lost_to_alignment) };
        state.base = Some(base);
        state.usable = usable;

        let region_ptr = base.cast::<RegionHeader>();
        // Safety: `base` is `align`-aligned and `usable >= size_of::<RegionHeader>()`.
        unsafe { region_ptr.write(RegionHeader::new_free(usable)) };

        state.end = RegionHeader::new_free(usable);
        let end_ptr = state.end_ptr();
        // Safety: `region_ptr` was just written above.
        unsafe { (*region_ptr).set_next_free(end_ptr) };

        state.start = RegionHeader::new_free(0);
        state.start.set_next_free(region_ptr);

        state.counters.init(usable);
    }

    /// `insert(region)` (spec.md §4.3, SCHEME-SIZE-ORDERED): splice `region`
    /// into the free list immediately before the first node whose size is
    /// `>= region`'s, preserving ascending order and the stability of ties.
    fn insert(state: &mut State, region: *mut RegionHeader) {
        // Safety: `region` was just written as a valid free header.
        let region_size = unsafe { (*region).size() };
        let mut cursor = state.start_ptr();
        loop {
            // Safety: every node reachable from `start` is a live header.
            let next = unsafe { (*cursor).next_free() };
            let next_size = unsafe { (*next).size() };
            if next_size < region_size {
                cursor = next;
            } else {
                break;
            }
        }
        unsafe {
            (*region).set_next_free((*cursor).next_free());
            (*cursor).set_next_free(region);
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

        let end_ptr = state.end_ptr();
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
            // Safety: `need` bytes from `region_addr` were validated by the
            // free-list search above to lie within this free region.
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

    /// Claim `requested` bytes, splitting a larger free region when the
    /// remainder would still be at least `MIN_BLOCK`.
    ///
    /// Returns `NIL` (a null pointer) on any failure.
    pub fn allocate(&self, requested: usize) -> *mut u8 {
        self.try_allocate(requested).unwrap_or(core::ptr::null_mut())
    }

    /// As [`SizeOrderedHeap::allocate`], but distinguishes the failure reason.
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

    /// Release a region previously returned by [`SizeOrderedHeap::allocate`].
    ///
    /// `ptr` may be `NIL`, in which case this is a no-op.
    ///
    /// # Panics
    /// Panics (spec.md §7 `CorruptedHeaderOnFree`) if the recovered header
    /// is not marked allocated, or has a non-`NIL` `next_free` — both
    /// indicate caller misuse (double free, wild pointer, or header
    /// corruption) and halting is the only safe response.
    pub fn free(&self, ptr: *mut u8) {
        let Some(ptr) = core::ptr::NonNull::new(ptr) else {
            return;
        };
        let align = S::ALIGNMENT;
        let header = header_size_aligned(align);
        // Safety: a non-null `ptr` must have been returned by `allocate`,
        // which always places `header` bytes before the payload.
        let header_ptr: *mut RegionHeader = unsafe { ptr.as_ptr().sub(header).cast() };

        // Safety: `header_ptr` points at a region header if `ptr` was a
        // value this allocator actually returned; that contract is the
        // caller's to uphold, and violating it is exactly what this
        // assertion is here to catch.
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

    /// `calloc(n, size)`: like [`SizeOrderedHeap::allocate`], but
    /// zero-initializes the region and checks `n * size` for overflow
    /// first.
    pub fn calloc(&self, n: usize, size: usize) -> *mut u8 {
        self.try_calloc(n, size).unwrap_or(core::ptr::null_mut())
    }

    /// As [`SizeOrderedHeap::calloc`], but distinguishes the failure reason.
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

    /// No-op on this scheme; present only for call-site compatibility with
    /// [`crate::bump::BumpHeap::initialize_blocks`].
    pub fn initialize_blocks(&self) {}

    #[cfg(test)]
    fn debug_min_ever_free(&self) -> usize {
        self.state.with_lock(|state| state.counters.min_ever_free)
    }

    #[cfg(test)]
    fn debug_sizes_ascending(&self) -> bool {
        self.state.with_lock(|state| {
            let end_ptr = state.end_ptr();
            let mut cursor = state.start_ptr();
            let mut last = 0usize;
            loop {
                // Safety: test-only walk of a heap that outlives the call.
                let next = unsafe { (*cursor).next_free() };
                if next == end_ptr {
                    return true;
                }
                let size = unsafe { (*next).size() };
                if size < last {
                    return false;
                }
                last = size;
                cursor = next;
            }
        })
    }
}

// Safety: all mutable state lives behind `SpinLock`, and `S::region()` is
// guaranteed stable by `HeapStorage`'s contract.
unsafe impl<S, Sch, Oom, Trace> Sync for SizeOrderedHeap<S, Sch, Oom, Trace>
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

    fn heap() -> SizeOrderedHeap<StaticHeap<1024, 8>> {
        SizeOrderedHeap::new(StaticHeap::new(), NullScheduler, NoopOomHook, NoopTraceHooks)
    }

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let h = heap();
        let a = h.allocate(40);
        let b = h.allocate(8);
        assert!(!a.is_null());
        assert!(!b.is_null());
        assert_eq!(a as usize % 8, 0);
        assert_eq!(b as usize % 8, 0);
        assert!(a != b);
    }

    #[test]
    fn free_list_stays_size_ordered_after_several_operations() {
        let h = heap();
        let a = h.allocate(16);
        let b = h.allocate(64);
        let c = h.allocate(8);
        h.free(b);
        h.free(a);
        h.free(c);
        assert!(h.debug_sizes_ascending());
    }

    #[test]
    fn free_then_reallocate_same_size_succeeds() {
        let h = heap();
        let p = h.allocate(32);
        assert!(!p.is_null());
        h.free(p);
        let q = h.allocate(32);
        assert!(!q.is_null());
    }

    #[test]
    fn watermark_never_recovers() {
        let h = heap();
        let before = h.free_heap_size();
        let p = h.allocate(256);
        assert!(!p.is_null());
        h.free(p);
        assert_eq!(h.free_heap_size(), before);
        assert!(h.debug_min_ever_free() < before);
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
    #[should_panic]
    fn corrupted_next_free_is_caught_on_free() {
        let h = heap();
        let p = h.allocate(16);
        let header = unsafe { &mut *p.sub(header_size_aligned(8)).cast::<RegionHeader>() };
        header.set_next_free(p.cast());
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
