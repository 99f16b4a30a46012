//! # Hooks — OOM callback and allocation tracing
//!
//! Both are injected, optional collaborators (spec.md §6). Neither runs
//! inside a heap's critical section: the OOM hook because it may need to
//! yield or reclaim memory, the trace hooks because they commonly forward
//! to a logger that itself may allocate or block.

/// Invoked after [`crate::bump::BumpHeap::allocate`] (or the equivalent on
/// the other schemes) returns a null pointer, outside the critical section.
///
/// Only called when the `malloc-failed-hook` feature is enabled.
pub trait OomHook {
    /// Called once per failed allocation attempt.
    fn on_malloc_failed(&self);
}

/// A hook that logs at `warn` level via the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingOomHook;

impl OomHook for LoggingOomHook {
    fn on_malloc_failed(&self) {
        log::warn!("kernel-alloc: allocation request could not be satisfied");
    }
}

/// A hook that does nothing; the default when no OOM handling is wanted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOomHook;

impl OomHook for NoopOomHook {
    #[inline]
    fn on_malloc_failed(&self) {}
}

/// Tracing hooks mirroring FreeRTOS's `traceMALLOC`/`traceFREE`.
///
/// Only called when the `trace` feature is enabled.
pub trait TraceHooks {
    /// Called after a successful allocation with the payload pointer and
    /// the originally requested size.
    fn trace_malloc(&self, ptr: *mut u8, requested: usize);

    /// Called after a region is released, with the payload pointer (now
    /// dangling) and the region's payload size.
    fn trace_free(&self, ptr: *mut u8, size: usize);
}

/// Tracing hooks that forward to `log::trace!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTraceHooks;

impl TraceHooks for LoggingTraceHooks {
    fn trace_malloc(&self, ptr: *mut u8, requested: usize) {
        log::trace!("kernel-alloc: malloc({requested}) -> {ptr:p}");
    }

    fn trace_free(&self, ptr: *mut u8, size: usize) {
        log::trace!("kernel-alloc: free({ptr:p}, {size})");
    }
}

/// Tracing hooks that do nothing; the default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTraceHooks;

impl TraceHooks for NoopTraceHooks {
    #[inline]
    fn trace_malloc(&self, _ptr: *mut u8, _requested: usize) {}

    #[inline]
    fn trace_free(&self, _ptr: *mut u8, _size: usize) {}
}
