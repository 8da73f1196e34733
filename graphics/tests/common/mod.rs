//! Shared fixtures for the frame graph integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use framewright_graphics::{
    DeviceEvent, DummyDevice, EventBus, FrameGraph, GraphConfig, ResourceState,
    TextureDescriptor, TextureFormat, TextureUsage,
};

/// Small heaps so tests stay cheap; two workers so passes really run in
/// parallel.
pub fn test_config() -> GraphConfig {
    GraphConfig::default()
        .with_worker_threads(2)
        .with_buffer_heaps(1 << 20, 1 << 16)
        .with_texture_heap(1 << 22, 1 << 12, 1 << 20)
        .with_constant_ring_size(1 << 16)
}

/// A fresh graph on a recording device.
pub fn graph() -> (Arc<DummyDevice>, FrameGraph) {
    graph_with(DummyDevice::new(), EventBus::new())
}

pub fn graph_with(device: DummyDevice, events: EventBus) -> (Arc<DummyDevice>, FrameGraph) {
    let device = Arc::new(device);
    let graph = FrameGraph::new(device.clone(), test_config(), events)
        .expect("frame graph creation failed");
    (device, graph)
}

/// Drive `count` frames from a single thread, walking the thread indices
/// round-robin.
pub fn run_frames(graph: &FrameGraph, count: usize) {
    let frames = graph.frames_in_flight();
    for _ in 0..count {
        let next = graph.frame_index() as usize % frames;
        graph.execute(next).expect("frame failed");
    }
}

pub fn render_target(size: u32) -> TextureDescriptor {
    TextureDescriptor::new_2d(
        size,
        size,
        TextureFormat::Rgba8Unorm,
        TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
    )
    .with_state(ResourceState::RenderTarget)
}

/// Queue-level events only: executions, markers and presents.
pub fn queue_events(device: &DummyDevice) -> Vec<DeviceEvent> {
    device
        .events()
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                DeviceEvent::Execute { .. }
                    | DeviceEvent::Signal { .. }
                    | DeviceEvent::Wait { .. }
                    | DeviceEvent::Present { .. }
            )
        })
        .collect()
}
