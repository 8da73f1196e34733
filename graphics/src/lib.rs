//! # Framewright Graphics
//!
//! Frame graph scheduler and GPU resource lifetime engine.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`FrameGraph`] - Passes declare the resources they read and write; the
//!   graph orders them, inserts barriers and cross-queue synchronization,
//!   and records every pass in parallel on a task executor
//! - [`ResourcePool`] - Named resources that are placed lazily, alias each
//!   other's memory when their lifetimes do not overlap, and are evicted
//!   after a few untouched frames
//! - [`FramePipeline`] - One render thread per frame in flight, taking turns
//!   so recording, submission and GPU waits of consecutive frames overlap
//! - [`GpuDevice`] - The device collaborator, with a recording
//!   [`DummyDevice`] behind the default `dummy` feature
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use framewright_graphics::{
//!     BufferDescriptor, BufferUsage, DummyDevice, EventBus, FrameGraph, GraphConfig, PassDesc,
//! };
//!
//! let device = Arc::new(DummyDevice::new());
//! let mut graph = FrameGraph::new(device, GraphConfig::default(), EventBus::new()).unwrap();
//!
//! graph
//!     .add_pass(
//!         PassDesc::compute("Simulate"),
//!         |particles: &mut Option<framewright_graphics::BufferRef>, builder| {
//!             *particles = Some(builder.declare_write_buffer(
//!                 "Particles",
//!                 BufferDescriptor::new(4096, BufferUsage::STORAGE),
//!             ));
//!         },
//!         |_particles, _ctx, list| list.dispatch(64, 1, 1),
//!     )
//!     .unwrap();
//! graph.compile().unwrap();
//!
//! // Single-threaded driving walks the slots in order.
//! for thread_index in 0..graph.frames_in_flight() {
//!     graph.execute(thread_index).unwrap();
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod memory;
pub mod pipeline;
pub mod types;

// Re-export main types for convenience
#[cfg(feature = "dummy")]
pub use backend::{DeviceEvent, DummyDevice};
pub use backend::{CommandList, GpuDevice, GpuResource};
pub use config::GraphConfig;
pub use error::{DeviceError, GraphError};
pub use events::{EventBus, FrameEvent};
pub use graph::{
    BoundResource, BufferRef, FrameGraph, FrameSlot, PassBuilder, PassContext, PassDesc, PassId,
    ResourcePool, TextureRef,
};
pub use pipeline::FramePipeline;
pub use types::{
    BufferDescriptor, BufferUsage, QueueClass, ResourceState, TextureDescriptor, TextureFormat,
    TextureUsage,
};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

static_assertions::assert_impl_all!(FrameGraph: Send, Sync);
static_assertions::assert_impl_all!(ResourcePool: Send, Sync);
static_assertions::assert_impl_all!(EventBus: Send, Sync, Clone);

/// Initialize the graphics subsystem.
///
/// Only logs the version; call it once after the logger is set up.
pub fn init() {
    log::info!("Framewright Graphics v{} initialized", VERSION);
}
