//! Buffer types and descriptors.

use bitflags::bitflags;

use super::ResourceState;

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be used as a vertex buffer.
        const VERTEX = 1 << 0;
        /// Buffer can be used as an index buffer.
        const INDEX = 1 << 1;
        /// Buffer can be used as a constant buffer.
        const UNIFORM = 1 << 2;
        /// Buffer can be used as a structured storage buffer.
        const STORAGE = 1 << 3;
        /// Buffer can be used as an indirect argument buffer.
        const INDIRECT = 1 << 4;
        /// Buffer can be copied from.
        const COPY_SRC = 1 << 5;
        /// Buffer can be copied to.
        const COPY_DST = 1 << 6;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Which heap backs a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HeapType {
    /// GPU-local memory.
    #[default]
    Default,
    /// CPU-visible memory the GPU reads directly.
    Upload,
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Element stride for structured buffers, 0 otherwise.
    pub stride: u32,
    /// Usage flags.
    pub usage: BufferUsage,
    /// Backing heap.
    pub heap: HeapType,
    /// State a pass declaring this buffer needs it in.
    pub state: ResourceState,
}

impl BufferDescriptor {
    /// Create a new buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            size,
            usage,
            ..Default::default()
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the structured element stride.
    pub fn with_stride(mut self, stride: u32) -> Self {
        self.stride = stride;
        self
    }

    /// Set the backing heap.
    pub fn with_heap(mut self, heap: HeapType) -> Self {
        self.heap = heap;
        self
    }

    /// Set the state declaring passes need.
    pub fn with_state(mut self, state: ResourceState) -> Self {
        self.state = state;
        self
    }

    /// Two buffers may share memory when they are the same size on the
    /// same heap.
    pub fn can_alias(&self, other: &Self) -> bool {
        self.size == other.size && self.heap == other.heap
    }
}
