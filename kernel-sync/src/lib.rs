//! # Kernel synchronization primitives
//!
//! A single spinlock type, small enough to audit, used by `kernel-alloc` to
//! guard structural mutation of heap state inside its critical sections.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
