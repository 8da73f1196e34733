use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use framewright_graphics::{
    BufferDescriptor, BufferUsage, DummyDevice, EventBus, FrameGraph, GraphConfig, PassDesc,
    ResourceState, TextureDescriptor, TextureFormat, TextureUsage,
};

fn config() -> GraphConfig {
    GraphConfig::default()
        .with_worker_threads(2)
        .with_texture_heap(1 << 26, 1 << 12, 1 << 24)
}

fn target() -> TextureDescriptor {
    TextureDescriptor::new_2d(256, 256, TextureFormat::Rgba8Unorm, TextureUsage::RENDER_ATTACHMENT)
        .with_state(ResourceState::RenderTarget)
}

/// A chain of `count` graphics passes, each reading the previous pass's
/// target, with a compute pass branching off every fourth pass.
fn chain(count: usize) -> (Arc<DummyDevice>, FrameGraph) {
    let device = Arc::new(DummyDevice::new());
    let mut graph = FrameGraph::new(device.clone(), config(), EventBus::new()).unwrap();
    for i in 0..count {
        let input = (i > 0).then(|| format!("target_{}", i - 1));
        let output = format!("target_{i}");
        graph
            .add_pass::<(), _, _>(
                PassDesc::graphics(format!("pass_{i}"), 256, 256),
                move |_, builder| {
                    if let Some(input) = &input {
                        builder.transition_read_texture(input, ResourceState::ShaderResource);
                    }
                    builder.declare_write_texture(&output, target());
                },
                |_, _, list| list.draw(3, 1),
            )
            .unwrap();

        if i % 4 == 3 {
            let source = format!("target_{i}");
            let histogram = format!("histogram_{i}");
            graph
                .add_pass::<(), _, _>(
                    PassDesc::compute(format!("histogram_{i}")),
                    move |_, builder| {
                        builder.transition_read_texture(&source, ResourceState::ShaderResource);
                        builder.declare_write_buffer(
                            &histogram,
                            BufferDescriptor::new(1024, BufferUsage::STORAGE)
                                .with_state(ResourceState::UnorderedAccess),
                        );
                    },
                    |_, _, list| list.dispatch(16, 16, 1),
                )
                .unwrap();
        }
    }
    (device, graph)
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

fn bench_compile_small(c: &mut Criterion) {
    c.bench_function("frame_graph_compile_4_passes", |b| {
        b.iter(|| {
            let (_device, mut graph) = chain(4);
            graph.compile().unwrap();
            black_box(graph.edges().len());
        });
    });
}

fn bench_compile_large(c: &mut Criterion) {
    c.bench_function("frame_graph_compile_32_passes", |b| {
        b.iter(|| {
            let (_device, mut graph) = chain(32);
            graph.compile().unwrap();
            black_box(graph.edges().len());
        });
    });
}

// ---------------------------------------------------------------------------
// Frame execution
// ---------------------------------------------------------------------------

fn bench_execute_frame(c: &mut Criterion) {
    let (device, mut graph) = chain(16);
    graph.compile().unwrap();
    let frames = graph.frames_in_flight();

    c.bench_function("frame_graph_execute_16_passes", |b| {
        b.iter(|| {
            let next = graph.frame_index() as usize % frames;
            graph.execute(next).unwrap();
            // The dummy device keeps every call; drop them between frames.
            device.clear_events();
        });
    });
}

criterion_group!(
    benches,
    bench_compile_small,
    bench_compile_large,
    bench_execute_frame,
);
criterion_main!(benches);
