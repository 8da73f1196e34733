//! Concurrent address-space allocators.
//!
//! Four independent allocators, each managing offsets or indices inside a
//! fixed-capacity arena. None of them touch memory; callers map the returned
//! offsets onto whatever backing storage they own (GPU heaps, descriptor
//! tables).
//!
//! | Allocator | Granularity | Typical use |
//! |-----------|-------------|-------------|
//! | [`BuddyAllocator`] | power-of-two blocks | buffer heaps |
//! | [`SegregatedListAllocator`] | log2 size classes | texture heaps |
//! | [`RingAllocator`] / [`FrameRing`] | FIFO bytes | per-frame constants, GPU descriptors |
//! | [`IndexFreeList`] | single indices | CPU descriptor slots |
//!
//! All `try_*` calls report failure through `Option`/`bool` and never
//! panic on exhaustion. The list-based allocators lock one or two nodes at
//! a time (see [`lock_list`](crate::lock_list)), the ring is lock-free.

mod buddy;
mod free_list;
mod ring;
mod seg_list;

pub use buddy::{Block, BuddyAllocator};
pub use free_list::{FreeRange, IndexFreeList};
pub use ring::{FrameRing, RingAllocator};
pub use seg_list::{SegregatedBlock, SegregatedListAllocator};
