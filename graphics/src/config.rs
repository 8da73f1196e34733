//! Frame graph configuration.

use crate::error::GraphError;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Sizing and pipelining parameters for a [`FrameGraph`](crate::FrameGraph).
///
/// # Example
///
/// ```
/// use framewright_graphics::GraphConfig;
///
/// let config = GraphConfig::default()
///     .with_worker_threads(2)
///     .with_constant_ring_size(1 << 20);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    /// Number of frame slots and render threads.
    pub frames_in_flight: usize,
    /// Frames a pool resource may go untouched before it is evicted.
    pub eviction_grace_frames: u64,
    /// Task executor workers. `0` picks a quarter of the available cores.
    pub worker_threads: usize,
    /// Size of the GPU-local buffer heap (buddy allocated).
    pub buffer_heap_size: u64,
    /// Size of the CPU-visible upload heap (buddy allocated).
    pub upload_heap_size: u64,
    /// Minimum buffer block, also the buffer placement alignment.
    pub buffer_alignment: u64,
    /// Arena size of each texture size class.
    pub texture_heap_size: u64,
    /// Smallest texture size class.
    pub texture_min_block: u64,
    /// Largest texture size class.
    pub texture_max_block: u64,
    /// Size of the per-frame constant ring.
    pub constant_ring_size: u64,
    /// Alignment of each constant block.
    pub constant_alignment: u64,
    /// Number of CPU descriptor slots.
    pub cpu_descriptor_count: u64,
    /// Number of shader-visible descriptor slots.
    pub gpu_descriptor_count: u64,
    /// Leading shader-visible slots kept out of the per-frame ring.
    pub gpu_descriptor_reserved: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            eviction_grace_frames: 6,
            worker_threads: 0,
            buffer_heap_size: 256 * MIB,
            upload_heap_size: 64 * MIB,
            buffer_alignment: 256,
            texture_heap_size: 256 * MIB,
            texture_min_block: 64 * KIB,
            texture_max_block: 64 * MIB,
            constant_ring_size: 4 * MIB,
            constant_alignment: 256,
            cpu_descriptor_count: 4096,
            gpu_descriptor_count: 8192,
            gpu_descriptor_reserved: 64,
        }
    }
}

impl GraphConfig {
    /// Set the worker thread count.
    pub fn with_worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count;
        self
    }

    /// Set the number of frames in flight.
    pub fn with_frames_in_flight(mut self, count: usize) -> Self {
        self.frames_in_flight = count;
        self
    }

    /// Set the eviction grace period.
    pub fn with_eviction_grace_frames(mut self, frames: u64) -> Self {
        self.eviction_grace_frames = frames;
        self
    }

    /// Set both buffer heap sizes.
    pub fn with_buffer_heaps(mut self, default_size: u64, upload_size: u64) -> Self {
        self.buffer_heap_size = default_size;
        self.upload_heap_size = upload_size;
        self
    }

    /// Set the texture size classes.
    pub fn with_texture_heap(mut self, class_size: u64, min_block: u64, max_block: u64) -> Self {
        self.texture_heap_size = class_size;
        self.texture_min_block = min_block;
        self.texture_max_block = max_block;
        self
    }

    /// Set the constant ring size.
    pub fn with_constant_ring_size(mut self, size: u64) -> Self {
        self.constant_ring_size = size;
        self
    }

    /// Set the descriptor heap sizes.
    pub fn with_descriptors(mut self, cpu: u64, gpu: u64, gpu_reserved: u64) -> Self {
        self.cpu_descriptor_count = cpu;
        self.gpu_descriptor_count = gpu;
        self.gpu_descriptor_reserved = gpu_reserved;
        self
    }

    /// Check that the configuration describes usable heaps.
    pub fn validate(&self) -> Result<(), GraphError> {
        let invalid = |msg: String| Err(GraphError::InvalidConfig(msg));

        if self.frames_in_flight == 0 {
            return invalid("frames_in_flight must be at least 1".into());
        }
        if self.eviction_grace_frames < self.frames_in_flight as u64 {
            return invalid(format!(
                "eviction grace of {} frames is shorter than {} frames in flight",
                self.eviction_grace_frames, self.frames_in_flight
            ));
        }
        if !self.buffer_alignment.is_power_of_two() || !self.constant_alignment.is_power_of_two()
        {
            return invalid("alignments must be powers of two".into());
        }
        if self.buffer_heap_size < self.buffer_alignment
            || self.upload_heap_size < self.buffer_alignment
        {
            return invalid("buffer heaps are smaller than one block".into());
        }
        if self.texture_min_block == 0 || self.texture_min_block > self.texture_max_block {
            return invalid(format!(
                "texture blocks [{}, {}] are not a valid range",
                self.texture_min_block, self.texture_max_block
            ));
        }
        if self.texture_heap_size < self.texture_max_block {
            return invalid("texture heap cannot hold its largest class".into());
        }
        if self.constant_ring_size < 2 * self.constant_alignment {
            return invalid("constant ring is smaller than two blocks".into());
        }
        if self.cpu_descriptor_count == 0 {
            return invalid("cpu_descriptor_count must be positive".into());
        }
        if self.gpu_descriptor_reserved + 2 > self.gpu_descriptor_count {
            return invalid(format!(
                "{} reserved descriptors leave no ring in a heap of {}",
                self.gpu_descriptor_reserved, self.gpu_descriptor_count
            ));
        }
        Ok(())
    }
}
