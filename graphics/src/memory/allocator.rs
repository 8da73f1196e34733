//! Placement of frame graph resources inside the GPU heaps.

use std::sync::Arc;

use framewright_core::alloc::{BuddyAllocator, FrameRing, SegregatedListAllocator};
use framewright_core::AllocError;

use crate::config::GraphConfig;
use crate::types::{BufferDescriptor, HeapType, TextureDescriptor};

/// Which heap a [`MemoryLocation`] lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapKind {
    /// GPU-local buffer heap.
    Default,
    /// CPU-visible buffer heap.
    Upload,
    /// Texture heap segment of the given size class.
    Texture(usize),
    /// Per-frame constant ring.
    Constants,
    /// Memory owned outside the frame graph.
    Dedicated,
}

/// A placed range of GPU memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryLocation {
    pub heap: HeapKind,
    pub offset: u64,
    pub size: u64,
}

impl MemoryLocation {
    /// A location for memory the frame graph does not manage.
    pub fn dedicated(size: u64) -> Self {
        Self {
            heap: HeapKind::Dedicated,
            offset: 0,
            size,
        }
    }
}

struct Heaps {
    default: BuddyAllocator,
    upload: BuddyAllocator,
    textures: SegregatedListAllocator,
    constants: FrameRing,
    constant_alignment: u64,
}

impl Heaps {
    fn release(&self, location: &MemoryLocation) {
        let released = match location.heap {
            HeapKind::Default => self.default.try_free(location.offset, location.size),
            HeapKind::Upload => self.upload.try_free(location.offset, location.size),
            HeapKind::Texture(_) => self.textures.try_free(location.offset, location.size),
            HeapKind::Constants | HeapKind::Dedicated => true,
        };
        if released {
            log::trace!("memory: released {location:?}");
        } else {
            log::warn!("memory: heap rejected release of {location:?}");
        }
    }
}

/// Shared ownership of one placed allocation.
///
/// Every resource placed in the range holds a clone; the range goes back
/// to its heap when the last clone drops. Aliased resources share one
/// lease, so evicting any of them never frees memory another still uses.
#[derive(Clone)]
pub struct MemoryLease(Arc<LeaseInner>);

struct LeaseInner {
    location: MemoryLocation,
    heaps: Arc<Heaps>,
}

impl Drop for LeaseInner {
    fn drop(&mut self) {
        self.heaps.release(&self.location);
    }
}

impl MemoryLease {
    /// Where the leased memory lives.
    pub fn location(&self) -> MemoryLocation {
        self.0.location
    }

    /// Number of resources currently placed in this range.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl std::fmt::Debug for MemoryLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MemoryLease").field(&self.0.location).finish()
    }
}

/// Facade over the heap allocators.
///
/// Buffers are buddy allocated from the heap their descriptor names,
/// textures are placed by size class, and frame constants come from a
/// ring recycled one frame at a time.
#[derive(Clone)]
pub struct ResourceAllocator {
    heaps: Arc<Heaps>,
}

impl ResourceAllocator {
    /// Heaps sized from `config`.
    pub fn new(config: &GraphConfig) -> Self {
        let heaps = Heaps {
            default: BuddyAllocator::new(config.buffer_heap_size, config.buffer_alignment),
            upload: BuddyAllocator::new(config.upload_heap_size, config.buffer_alignment),
            textures: SegregatedListAllocator::new(
                config.texture_heap_size,
                config.texture_min_block,
                config.texture_max_block,
            ),
            constants: FrameRing::new(config.constant_ring_size),
            constant_alignment: config.constant_alignment,
        };
        Self {
            heaps: Arc::new(heaps),
        }
    }

    /// Place a buffer.
    pub fn allocate_buffer(&self, descriptor: &BufferDescriptor) -> Result<MemoryLease, AllocError> {
        let (heap, allocator) = match descriptor.heap {
            HeapType::Default => (HeapKind::Default, &self.heaps.default),
            HeapType::Upload => (HeapKind::Upload, &self.heaps.upload),
        };
        let offset = allocator.allocate(descriptor.size)?;
        let size = allocator
            .block_size(descriptor.size)
            .ok_or(AllocError::SizeOutOfRange(descriptor.size))?;
        Ok(self.lease(MemoryLocation { heap, offset, size }))
    }

    /// Place a texture in the segment of its size class.
    pub fn allocate_texture(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<MemoryLease, AllocError> {
        let block = self.heaps.textures.allocate(descriptor.byte_size())?;
        Ok(self.lease(MemoryLocation {
            heap: HeapKind::Texture(block.class_index),
            offset: block.offset,
            size: block.size,
        }))
    }

    /// Carve `size` bytes of frame constants out of the current frame.
    pub fn allocate_constants(&self, size: u64) -> Result<MemoryLocation, AllocError> {
        let align = self.heaps.constant_alignment;
        let size = size.max(1).div_ceil(align) * align;
        let offset = self
            .heaps
            .constants
            .try_allocate(size)
            .ok_or(AllocError::OutOfSpace {
                requested: size,
                capacity: self.heaps.constants.ring().capacity(),
            })?;
        Ok(MemoryLocation {
            heap: HeapKind::Constants,
            offset,
            size,
        })
    }

    /// Close the current frame's constant allocations.
    pub fn finish_frame(&self) {
        self.heaps.constants.finish_frame_allocation();
    }

    /// Recycle the constants of the oldest finished frame.
    pub fn retire_frame(&self) -> Result<(), AllocError> {
        self.heaps.constants.clear_frame_resource().map(|_| ())
    }

    /// Free bytes left in `heap`.
    pub fn free_bytes(&self, heap: HeapKind) -> u64 {
        match heap {
            HeapKind::Default => self.heaps.default.free_size(),
            HeapKind::Upload => self.heaps.upload.free_size(),
            HeapKind::Texture(class) => {
                self.heaps.textures.free_slots(class) * self.heaps.textures.class_size(class)
            }
            HeapKind::Constants => self.heaps.constants.ring().available(),
            HeapKind::Dedicated => 0,
        }
    }

    fn lease(&self, location: MemoryLocation) -> MemoryLease {
        log::trace!("memory: placed {location:?}");
        MemoryLease(Arc::new(LeaseInner {
            location,
            heaps: Arc::clone(&self.heaps),
        }))
    }
}

impl std::fmt::Debug for ResourceAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceAllocator")
            .field("default_free", &self.free_bytes(HeapKind::Default))
            .field("upload_free", &self.free_bytes(HeapKind::Upload))
            .finish_non_exhaustive()
    }
}
