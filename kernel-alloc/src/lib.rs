//! # kernel-alloc
//!
//! Three interoperable fixed-heap allocators for `no_std` kernels, sharing
//! one contract and differing only in how they organize and release free
//! space:
//!
//! - [`bump`]: a monotonic cursor that never frees. Cheapest, simplest,
//!   right for boot-time-only allocation.
//! - [`size_ordered`]: a size-sorted free list. First-fit is best-fit by
//!   construction; no coalescing, so long-lived workloads can fragment.
//! - [`address_coalescing`]: an address-sorted free list that merges
//!   freed regions with their adjacent free neighbors, trading a little
//!   more work per `free` for bounded fragmentation.
//!
//! ## Architecture
//!
//! ```text
//!              +-----------+      +-----------+
//!              |   PORT    |      |  hooks::*  |
//!              | (storage) |      | (OOM/trace)|
//!              +-----+-----+      +-----+------+
//!                    |                  |
//!   +-------+   +----v------------------v----+   +---------+
//!   | arith |-->|   bump / size_ordered /    |<--| critsec |
//!   +-------+   |   address_coalescing        |   +---------+
//!   +--------+  |  (each: SpinLock<State>)    |
//!   | header |->|                             |
//!   +--------+  +-------------+---------------+
//!                             |
//!                      +------v------+
//!                      |    stats    |
//!                      +-------------+
//! ```
//!
//! Every scheme is generic over its [`port::HeapStorage`], its
//! [`critsec::Scheduler`], and its [`hooks::OomHook`]/[`hooks::TraceHooks`]
//! — all injected, none provided by default beyond the no-op
//! implementations used in tests. Construct one as a `static`:
//!
//! ```
//! use kernel_alloc::address_coalescing::AddressCoalescingHeap;
//! use kernel_alloc::critsec::NullScheduler;
//! use kernel_alloc::hooks::{NoopOomHook, NoopTraceHooks};
//! use kernel_alloc::port::StaticHeap;
//!
//! static HEAP: AddressCoalescingHeap<StaticHeap<4096, 8>> =
//!     AddressCoalescingHeap::new(StaticHeap::new(), NullScheduler, NoopOomHook, NoopTraceHooks);
//!
//! let p = HEAP.allocate(64);
//! assert!(!p.is_null());
//! HEAP.free(p);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod address_coalescing;
pub mod arith;
pub mod bump;
pub mod critsec;
pub mod error;
pub mod header;
pub mod hooks;
pub mod port;
pub mod size_ordered;
pub mod stats;

#[cfg(feature = "global-allocator")]
mod global;

#[cfg(feature = "global-allocator")]
pub use global::*;
