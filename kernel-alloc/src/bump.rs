//! # SCHEME-BUMP — a monotonic cursor, never-free allocator
//!
//! The simplest of the three families: every `allocate` call advances a
//! single cursor through the backing storage and never looks back. There is
//! no header, no free list, and no coalescing — `free` exists only to let
//! callers notice they called it (spec.md §4.4: the scheme asserts its
//! argument is `NIL`). Grounded on `heap_1.c`: no attempt is ever made to
//! free memory once allocated.
//!
//! Useful for allocate-only-at-boot workloads where the simplicity and
//! O(1) allocation cost outweigh never reclaiming anything.

use core::marker::PhantomData;

use kernel_sync::SpinLock;

use crate::arith;
use crate::critsec::{NullScheduler, Scheduler, SuspendGuard};
use crate::error::AllocError;
use crate::header::{header_size_aligned, min_block};
use crate::hooks::{NoopOomHook, NoopTraceHooks, OomHook, TraceHooks};
use crate::port::HeapStorage;
use crate::stats::Counters;

struct State {
    /// Base address of the usable region, set by `ensure_init`. `None`
    /// before the first call reaches the allocator.
    base: Option<*mut u8>,
    /// Byte offset of the next unclaimed byte, relative to `base`.
    cursor: usize,
    /// `N_total_aligned`: usable bytes after aligning the storage's start
    /// and truncating its length to a multiple of the alignment quantum.
    usable: usize,
    /// Set once, by `ensure_init`, if `usable` is too small to be useful.
    /// Permanent: matches spec.md §4.1's "allocator is permanently out of
    /// memory" failure mode.
    out_of_memory: bool,
    initialized: bool,
    counters: Counters,
}

impl State {
    const fn new() -> Self {
        Self {
            base: None,
            cursor: 0,
            usable: 0,
            out_of_memory: false,
            initialized: false,
            counters: Counters {
                free_bytes: 0,
                min_ever_free: 0,
                alloc_count: 0,
                free_count: 0,
            },
        }
    }
}

/// A bump-pointer heap over storage `S`, with an injected [`Scheduler`] and
/// optional hooks.
///
/// Construct with [`BumpHeap::new`] — every argument is a plain value, so
/// the whole thing can live in a `static` when `S`, `Sch`, `Oom`, and
/// `Trace` are all const-constructible, matching how the storage, hooks and
/// scheduler types in this crate are designed.
pub struct BumpHeap<S, Sch = NullScheduler, Oom = NoopOomHook, Trace = NoopTraceHooks>
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
    _marker: PhantomData<(Sch, Oom, Trace)>,
}

impl<S, Sch, Oom, Trace> BumpHeap<S, Sch, Oom, Trace>
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
            _marker: PhantomData,
        }
    }

    /// INIT (spec.md §4.1), run at most once, lazily, on first use.
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

        // Safety: `lost_to_alignment <= len`, so this stays within the
        // storage region and inherits `start`'s provenance over it.
        state.base = Some(unsafe { start.as_ptr().add(lost_to_alignment) });
        state.usable = usable;
        state.cursor = 0;
        state.counters.init(usable);
    }

    fn free_bytes_locked(state: &State) -> usize {
        state.counters.free_bytes
    }

    fn allocate_locked(&self, state: &mut State, requested: usize) -> Result<*mut u8, AllocError> {
        self.ensure_init(state);
        if state.out_of_memory {
            return Err(AllocError::StorageTooSmall);
        }

        let align = S::ALIGNMENT;
        let Some((adjusted, need)) = arith::normalize_request(requested, align, header_size_aligned(align)) else {
            return Err(if requested == 0 { AllocError::ZeroSized } else { AllocError::TooLarge });
        };
        let free_bytes = Self::free_bytes_locked(state);
        if need > free_bytes {
            return Err(AllocError::OutOfMemory);
        }

        let Some(new_cursor) = state.cursor.checked_add(adjusted) else {
            return Err(AllocError::OutOfMemory);
        };
        if new_cursor >= state.usable {
            return Err(AllocError::OutOfMemory);
        }

        // Safety: `[cursor, new_cursor)` lies within `[0, usable)`, which was
        // established as a subrange of the storage region by `ensure_init`.
        let base = state.base.expect("checked by out_of_memory above");
        let p = unsafe { base.add(state.cursor) };
        state.cursor = new_cursor;
        state.counters.record_alloc(adjusted);

        Ok(p)
    }

    /// Claim `requested` bytes, never reusing memory already handed out.
    ///
    /// Returns `NIL` (a null pointer) on any failure, mirroring the raw
    /// `pvPortMalloc` contract this crate generalizes.
    pub fn allocate(&self, requested: usize) -> *mut u8 {
        self.try_allocate(requested).unwrap_or(core::ptr::null_mut())
    }

    /// As [`BumpHeap::allocate`], but distinguishes the failure reason.
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

    /// `SCHEME-BUMP` has no `FREE` semantics (spec.md §4.4): this asserts
    /// its argument is `NIL` and otherwise does nothing.
    ///
    /// # Panics
    /// Panics if `ptr` is non-null.
    pub fn free(&self, ptr: *mut u8) {
        assert!(ptr.is_null(), "SCHEME-BUMP: free() called with a non-null pointer");
    }

    /// Bytes still available for allocation.
    #[must_use]
    pub fn free_heap_size(&self) -> usize {
        let _guard = SuspendGuard::new(&self.scheduler);
        self.state.with_lock(|state| {
            self.ensure_init(state);
            if state.out_of_memory { 0 } else { Self::free_bytes_locked(state) }
        })
    }

    /// Reset the cursor to the start of the heap, discarding every prior
    /// allocation without zeroing the storage. Exists, like
    /// `xPortResetHeap`-style hooks in the allocator this generalizes, to
    /// let an embedder recycle the whole arena between phases (e.g.
    /// boot-time setup vs. steady-state operation) rather than to serve any
    /// per-block purpose.
    pub fn initialize_blocks(&self) {
        let _guard = SuspendGuard::new(&self.scheduler);
        self.state.with_lock(|state| {
            self.ensure_init(state);
            if !state.out_of_memory {
                state.cursor = 0;
                state.counters.init(state.usable);
            }
        });
    }
}

// Safety: all mutable state lives behind `SpinLock`, and `S::region()` is
// guaranteed stable by `HeapStorage`'s contract.
unsafe impl<S, Sch, Oom, Trace> Sync for BumpHeap<S, Sch, Oom, Trace>
where
    S: HeapStorage + Sync,
    Sch: Scheduler + Sync,
    Oom: OomHook + Sync,
    Trace: TraceHooks + Sync,
{
}
