//! CPU and shader-visible descriptor heaps.

use std::sync::Arc;

use framewright_core::alloc::{FrameRing, IndexFreeList};
use framewright_core::AllocError;

use crate::config::GraphConfig;
use crate::error::GraphError;

/// An owned CPU descriptor slot, returned to its heap on drop.
pub struct CpuDescriptor {
    index: u64,
    heap: Arc<IndexFreeList>,
}

impl CpuDescriptor {
    /// Slot index in the CPU heap.
    pub fn index(&self) -> u64 {
        self.index
    }
}

impl Drop for CpuDescriptor {
    fn drop(&mut self) {
        if !self.heap.try_free(self.index) {
            log::warn!("descriptors: CPU slot {} was already free", self.index);
        }
    }
}

impl std::fmt::Debug for CpuDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CpuDescriptor").field(&self.index).finish()
    }
}

/// The descriptor heaps of one frame graph.
///
/// Resources keep their view in a CPU slot for their whole life. Each time
/// a pass runs, the views it touches are copied into fresh shader-visible
/// slots taken from a ring; the ring space of a frame is recycled once the
/// GPU has finished it. The first `gpu_descriptor_reserved` shader-visible
/// slots stay outside the ring for views that never change.
pub struct DescriptorHeaps {
    cpu: Arc<IndexFreeList>,
    gpu_static: IndexFreeList,
    gpu_ring: FrameRing,
    reserved: u64,
}

impl DescriptorHeaps {
    /// Heaps sized from `config`.
    pub fn new(config: &GraphConfig) -> Self {
        Self {
            cpu: Arc::new(IndexFreeList::new(config.cpu_descriptor_count)),
            gpu_static: IndexFreeList::new(config.gpu_descriptor_reserved),
            gpu_ring: FrameRing::new(config.gpu_descriptor_count - config.gpu_descriptor_reserved),
            reserved: config.gpu_descriptor_reserved,
        }
    }

    /// Take a CPU slot.
    pub fn allocate_cpu(&self) -> Result<CpuDescriptor, GraphError> {
        let index = self
            .cpu
            .try_allocate()
            .ok_or(GraphError::DescriptorsExhausted("CPU"))?;
        Ok(CpuDescriptor {
            index,
            heap: Arc::clone(&self.cpu),
        })
    }

    /// Take a reserved shader-visible slot that outlives frames.
    pub fn allocate_static_gpu(&self) -> Result<u64, GraphError> {
        self.gpu_static
            .try_allocate()
            .ok_or(GraphError::DescriptorsExhausted("reserved shader-visible"))
    }

    /// Take a shader-visible slot for the frame being recorded.
    pub fn allocate_gpu(&self) -> Result<u64, GraphError> {
        self.gpu_ring
            .try_allocate(1)
            .map(|offset| self.reserved + offset)
            .ok_or(GraphError::DescriptorsExhausted("shader-visible"))
    }

    /// Close the current frame's shader-visible allocations.
    pub fn finish_frame(&self) {
        self.gpu_ring.finish_frame_allocation();
    }

    /// Recycle the shader-visible slots of the oldest finished frame.
    pub fn retire_frame(&self) -> Result<(), AllocError> {
        self.gpu_ring.clear_frame_resource().map(|_| ())
    }

    /// Free CPU slots.
    pub fn cpu_free_count(&self) -> u64 {
        self.cpu.free_count()
    }

    /// Shader-visible slots in use by frames not yet retired.
    pub fn gpu_in_use(&self) -> u64 {
        self.gpu_ring.ring().used()
    }
}

impl std::fmt::Debug for DescriptorHeaps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorHeaps")
            .field("cpu_free", &self.cpu_free_count())
            .field("gpu_in_use", &self.gpu_in_use())
            .finish_non_exhaustive()
    }
}
