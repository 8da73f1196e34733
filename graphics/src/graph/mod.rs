//! Frame graph: passes, the resources they declare, and the orchestrator
//! that schedules them.
//!
//! # Architecture
//!
//! | Layer | Type | Purpose |
//! |-------|------|---------|
//! | Pipeline | [`FramePipeline`](crate::pipeline::FramePipeline) | One render thread per frame in flight |
//! | **Graph** | [`FrameGraph`] | Pass dependencies and frame phases (this module) |
//! | Pass | [`PassDesc`], [`PassBuilder`], [`PassContext`] | Declaration and recording of one pass |
//! | Pool | [`ResourcePool`] | Lazy allocation, aliasing and eviction |
//!
//! # Frame phases
//!
//! Each [`FrameGraph::execute`] call drives one frame slot through three
//! phases, handing each over to the next thread index once done:
//!
//! 1. **Record**: bump the frame counter, evict stale resources and run the
//!    compiled task graph. Each pass materializes its resources, records
//!    their barriers and then its own commands.
//! 2. **Submit**: execute the slot's lists in recording order, batched by
//!    queue, with marker waits and signals on cross-queue edges, then
//!    present and signal the slot fence.
//! 3. **Wait**: block on the slot fence and recycle the slot's transient
//!    descriptors and constants.

mod builder;
mod frame_graph;
mod pass;
mod pool;
mod resource;
mod slot;

pub use builder::PassBuilder;
pub use frame_graph::FrameGraph;
pub use pass::{PassContext, PassDesc};
pub use pool::ResourcePool;
pub use resource::{BoundResource, BufferRef, Resource, ResourceDesc, ResourceId, TextureRef};
pub use slot::FrameSlot;

/// Handle to a pass in a frame graph.
///
/// `PassId` is `Copy` and cheap to pass around. It is only valid within
/// the `FrameGraph` that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(u32);

impl PassId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Registration index of the pass.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for PassId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pass#{}", self.0)
    }
}
