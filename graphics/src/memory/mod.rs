//! GPU memory and descriptor heaps.
//!
//! | Heap | Allocator |
//! |------|-----------|
//! | GPU-local buffers | [`BuddyAllocator`](framewright_core::alloc::BuddyAllocator) |
//! | Upload buffers | [`BuddyAllocator`](framewright_core::alloc::BuddyAllocator) |
//! | Textures | [`SegregatedListAllocator`](framewright_core::alloc::SegregatedListAllocator), one segment per size class |
//! | Frame constants | [`FrameRing`](framewright_core::alloc::FrameRing) |
//! | CPU descriptors | [`IndexFreeList`](framewright_core::alloc::IndexFreeList) |
//! | Shader-visible descriptors | reserved [`IndexFreeList`](framewright_core::alloc::IndexFreeList) + [`FrameRing`](framewright_core::alloc::FrameRing) |

mod allocator;
mod descriptors;

pub use allocator::{HeapKind, MemoryLease, MemoryLocation, ResourceAllocator};
pub use descriptors::{CpuDescriptor, DescriptorHeaps};
