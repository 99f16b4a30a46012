//! # Error taxonomy
//!
//! The raw `allocate`/`free` entry points keep the spec-mandated NIL-pointer
//! contract (so a scheme can double as a `#[global_allocator]`), but every
//! scheme also offers a `try_allocate` returning this [`AllocError`] for
//! callers who want to distinguish *why* a request failed without
//! re-deriving it from a null pointer.
//!
//! Corruption detected on free (spec.md §7 `CorruptedHeaderOnFree`) is
//! deliberately not a variant here: it is a fatal assertion, not a
//! recoverable error, and is raised via `debug_assert!`/`assert!` in the
//! scheme modules.

/// Why an `allocate`/`calloc` request was refused.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// `requested == 0`.
    #[error("requested size must be nonzero")]
    ZeroSized,

    /// Rounding the request up to the alignment quantum and adding the
    /// header size overflowed `usize`, or the adjusted size's high bit
    /// would alias the allocated flag.
    #[error("requested size is too large to represent")]
    TooLarge,

    /// The heap's permanent failure state from `INIT` (spec.md §4.1):
    /// the backing buffer is too small to hold even one minimal region.
    #[error("heap storage is smaller than the minimum viable block")]
    StorageTooSmall,

    /// A large-enough free region could not be found.
    #[error("out of memory")]
    OutOfMemory,

    /// `calloc`'s `n * size` overflowed `usize`.
    #[error("calloc element count/size overflows")]
    CallocOverflow,
}
