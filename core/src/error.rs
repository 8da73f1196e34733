//! Allocation error types.

use thiserror::Error;

/// Errors reported by the `Result` wrappers over the allocators' `try_*` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// No free block large enough for the request.
    #[error("out of space: requested {requested} of {capacity}")]
    OutOfSpace {
        /// Requested size (bytes or slots).
        requested: u64,
        /// Total capacity of the allocator.
        capacity: u64,
    },
    /// The range is outside the arena, misaligned, or already free.
    #[error("invalid free of [{offset}, {offset}+{size})")]
    InvalidFree {
        /// Start of the rejected range.
        offset: u64,
        /// Size of the rejected range.
        size: u64,
    },
    /// The request is zero-sized or above the largest size class.
    #[error("size {0} is out of the supported range")]
    SizeOutOfRange(u64),
}
