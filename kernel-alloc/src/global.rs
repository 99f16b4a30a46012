//! # `GlobalAlloc` adapters
//!
//! Lets any of the three schemes double as `#[global_allocator]`. Only
//! compiled in behind the `global-allocator` feature, mirroring the
//! `APPLICATION_ALLOCATED_HEAP`-style opt-in of the rest of this crate's
//! feature surface.
//!
//! One real gap compared to a general-purpose `alloc::GlobalAlloc`:
//! requests are always served at the heap's fixed alignment quantum `A`
//! (`S::ALIGNMENT`), not at `Layout::align()`. `Layout::align()` is
//! asserted not to exceed `A` — set `A` to the platform's worst-case
//! alignment requirement (as FreeRTOS's `configs` do via
//! `portBYTE_ALIGNMENT`) if mixed-alignment types are ever boxed.

use core::alloc::{GlobalAlloc, Layout};

use crate::address_coalescing::AddressCoalescingHeap;
use crate::bump::BumpHeap;
use crate::critsec::Scheduler;
use crate::hooks::{OomHook, TraceHooks};
use crate::port::HeapStorage;
use crate::size_ordered::SizeOrderedHeap;

fn checked_size(layout: Layout, align: usize) -> usize {
    debug_assert!(layout.align() <= align, "kernel-alloc: requested alignment exceeds the heap's fixed quantum");
    layout.size().max(1)
}

// Safety: `BumpHeap::allocate`/`free` already satisfy the `GlobalAlloc`
// contract (a null return signals failure; `free` is a documented no-op for
// `NIL`); this only adapts the `Layout` calling convention.
unsafe impl<S, Sch, Oom, Trace> GlobalAlloc for BumpHeap<S, Sch, Oom, Trace>
where
    S: HeapStorage + Sync,
    Sch: Scheduler + Sync,
    Oom: OomHook + Sync,
    Trace: TraceHooks + Sync,
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.allocate(checked_size(layout, S::ALIGNMENT))
    }

    unsafe fn dealloc(&self, _ptr: *mut u8, _layout: Layout) {
        // SCHEME-BUMP never frees; leaking here matches its documented
        // contract rather than panicking on every `Box`/`Vec` drop.
    }
}

// Safety: see the `BumpHeap` impl above.
unsafe impl<S, Sch, Oom, Trace> GlobalAlloc for SizeOrderedHeap<S, Sch, Oom, Trace>
where
    S: HeapStorage + Sync,
    Sch: Scheduler + Sync,
    Oom: OomHook + Sync,
    Trace: TraceHooks + Sync,
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.allocate(checked_size(layout, S::ALIGNMENT))
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.free(ptr);
    }
}

// Safety: see the `BumpHeap` impl above.
unsafe impl<S, Sch, Oom, Trace> GlobalAlloc for AddressCoalescingHeap<S, Sch, Oom, Trace>
where
    S: HeapStorage + Sync,
    Sch: Scheduler + Sync,
    Oom: OomHook + Sync,
    Trace: TraceHooks + Sync,
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.allocate(checked_size(layout, S::ALIGNMENT))
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.free(ptr);
    }
}
