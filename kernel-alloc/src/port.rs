//! # PORT — the injected backing storage
//!
//! The allocator never allocates its own backing memory; it is handed a
//! byte range by a [`HeapStorage`] implementor. Two implementations are
//! provided: [`StaticHeap`], a crate-owned static array (the common case),
//! and [`ExternalHeap`], for the `application-allocated-heap` feature where
//! the application (or linker script) owns `ucHeap` instead.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

/// Supplies the byte-alignment quantum and the raw backing buffer for a
/// heap scheme.
///
/// # Safety
/// Implementors must return the same `(ptr, len)` pair from every call to
/// [`HeapStorage::region`] for the lifetime of the value, and that range
/// must be valid for reads and writes for as long as the implementor is
/// alive. Schemes rely on this to treat the region as a stable arena they
/// address via byte offsets.
pub unsafe trait HeapStorage {
    /// Alignment quantum `A`: a compile-time power of two, commonly the
    /// platform's pointer width.
    const ALIGNMENT: usize;

    /// The raw backing buffer as `(start, length_in_bytes)`.
    fn region(&self) -> (NonNull<u8>, usize);
}

/// A crate-owned, statically sized heap backing store.
///
/// Mirrors the teacher's `.bss`-backed `HeapMem([u8; HEAP_SIZE])`, made
/// generic over the size and alignment so a single type serves all three
/// schemes. Place one `static` instance per heap; `kernel-alloc` does not
/// require `#[link_section]` placement but nothing stops a caller from
/// wrapping one.
#[repr(C)]
pub struct StaticHeap<const N: usize, const ALIGN: usize = 16> {
    bytes: UnsafeCell<[u8; N]>,
}

// Safety: access is always mediated by the scheme's own critical section;
// the cell itself only needs to be shareable across threads.
unsafe impl<const N: usize, const ALIGN: usize> Sync for StaticHeap<N, ALIGN> {}

impl<const N: usize, const ALIGN: usize> StaticHeap<N, ALIGN> {
    /// Construct a zeroed heap of `N` bytes.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: UnsafeCell::new([0; N]),
        }
    }
}

impl<const N: usize, const ALIGN: usize> Default for StaticHeap<N, ALIGN> {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: `region()` always returns the same pointer (derived from `self`,
// which does not move once placed in a `static`) and the same length `N`.
unsafe impl<const N: usize, const ALIGN: usize> HeapStorage for StaticHeap<N, ALIGN> {
    const ALIGNMENT: usize = ALIGN;

    fn region(&self) -> (NonNull<u8>, usize) {
        // Safety: `bytes` is never null and the cast stays in-bounds of the array.
        let ptr = unsafe { NonNull::new_unchecked(self.bytes.get().cast::<u8>()) };
        (ptr, N)
    }
}

/// Heap storage backed by a caller-supplied `'static` byte slice.
///
/// Used when `APPLICATION_ALLOCATED_HEAP` semantics are wanted: the
/// application (or a linker-provided `extern "C" { static mut ucHeap: ... }`
/// symbol) owns the array, e.g. to place it in a particular memory region.
pub struct ExternalHeap<const ALIGN: usize = 16> {
    ptr: NonNull<u8>,
    len: usize,
}

impl<const ALIGN: usize> ExternalHeap<ALIGN> {
    /// Wrap an externally owned byte slice as heap storage.
    ///
    /// # Safety
    /// `region` must be valid for reads and writes for the `'static`
    /// lifetime implied by this type's use as allocator-backing storage,
    /// and must not be aliased by any other live reference.
    #[must_use]
    pub unsafe fn from_raw(region: &'static mut [u8]) -> Self {
        Self {
            // Safety: a `&mut` slice's pointer is always non-null.
            ptr: unsafe { NonNull::new_unchecked(region.as_mut_ptr()) },
            len: region.len(),
        }
    }
}

// Safety: the pointer/length pair given at construction is immutable for
// the life of this value.
unsafe impl<const ALIGN: usize> HeapStorage for ExternalHeap<ALIGN> {
    const ALIGNMENT: usize = ALIGN;

    fn region(&self) -> (NonNull<u8>, usize) {
        (self.ptr, self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_heap_reports_stable_region() {
        let heap: StaticHeap<1024, 8> = StaticHeap::new();
        let (p1, l1) = heap.region();
        let (p2, l2) = heap.region();
        assert_eq!(p1, p2);
        assert_eq!(l1, l2);
        assert_eq!(l1, 1024);
    }

    #[test]
    fn external_heap_wraps_caller_buffer() {
        let mut buf = [0u8; 64];
        // Safety: `buf` outlives this scoped use; test only, not 'static in
        // the strict sense, but nothing escapes the block.
        let heap: ExternalHeap<8> = unsafe {
            ExternalHeap::from_raw(core::mem::transmute::<&mut [u8], &'static mut [u8]>(
                buf.as_mut_slice(),
            ))
        };
        let (_, len) = heap.region();
        assert_eq!(len, 64);
    }
}
