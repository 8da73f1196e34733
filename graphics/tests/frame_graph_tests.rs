//! Integration tests for the frame graph, the resource pool and the frame
//! pipeline, run against the recording dummy device.
//!
//! # Test Categories
//!
//! - **Declaration Tests**: Pool entries are shared by name
//! - **Scheduling Tests**: Dependency edges and cross-queue markers
//! - **Lifetime Tests**: Aliasing and eviction across frames
//! - **Submission Tests**: Device call order for a whole frame
//! - **Pipeline Tests**: Render threads start, stop, and halt on fatal errors
//!
//! ```bash
//! cargo test -p framewright-graphics --test frame_graph_tests
//! ```

mod common;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use rstest::rstest;

use common::{graph, graph_with, queue_events, render_target, run_frames};
use framewright_graphics::backend::{Barrier, Command};
use framewright_graphics::{
    BufferDescriptor, BufferRef, BufferUsage, CommandList, DeviceEvent, DummyDevice, EventBus,
    FrameEvent, FramePipeline, GraphError, PassDesc, QueueClass, ResourceState, TextureDescriptor,
    TextureFormat, TextureRef, TextureUsage,
};

// ============================================================================
// Declaration Tests
// ============================================================================

#[test]
fn test_same_name_declares_one_resource() {
    let (_device, mut graph) = graph();
    let seen: Arc<Mutex<Vec<TextureRef>>> = Arc::default();

    for pass in ["first", "second"] {
        let seen = Arc::clone(&seen);
        graph
            .add_pass::<(), _, _>(
                PassDesc::graphics(pass, 64, 64),
                move |_, builder| {
                    let texture = builder.declare_write_texture("Shared", render_target(64));
                    seen.lock().unwrap().push(texture);
                },
                |_, _, _| {},
            )
            .unwrap();
    }
    graph.setup().unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], seen[1]);
    assert_eq!(graph.pool().texture_count(), 1);
}

// ============================================================================
// Scheduling Tests
// ============================================================================

#[rstest]
#[case::same_queue(QueueClass::Graphics, QueueClass::Graphics, false)]
#[case::graphics_to_compute(QueueClass::Graphics, QueueClass::Compute, true)]
#[case::graphics_to_none(QueueClass::Graphics, QueueClass::None, false)]
#[case::compute_to_copy(QueueClass::Compute, QueueClass::Copy, true)]
fn test_cross_queue_markers(
    #[case] producer: QueueClass,
    #[case] consumer: QueueClass,
    #[case] synchronized: bool,
) {
    let (_device, mut graph) = graph();
    let writer = graph
        .add_pass::<Option<BufferRef>, _, _>(
            PassDesc::new("Writer", producer),
            |data, builder| {
                let desc = BufferDescriptor::new(1024, BufferUsage::STORAGE)
                    .with_state(ResourceState::UnorderedAccess);
                *data = Some(builder.declare_write_buffer("Data", desc));
            },
            |_, _, _| {},
        )
        .unwrap();
    let reader = graph
        .add_pass::<Option<BufferRef>, _, _>(
            PassDesc::new("Reader", consumer),
            |data, builder| {
                *data = Some(builder.transition_read_buffer("Data", ResourceState::ShaderResource));
            },
            |_, _, _| {},
        )
        .unwrap();
    graph.compile().unwrap();

    assert_eq!(graph.edges(), &[(writer, reader)]);
    assert_eq!(graph.signals(writer), synchronized);
    assert_eq!(graph.waits(reader).contains(&writer), synchronized);
}

#[test]
#[should_panic(expected = "no texture named 'Missing'")]
fn test_transition_of_undeclared_resource_is_fatal() {
    let (_device, mut graph) = graph();
    graph
        .add_pass::<(), _, _>(
            PassDesc::compute("Broken"),
            |_, builder| {
                builder.transition_read_texture("Missing", ResourceState::ShaderResource);
            },
            |_, _, _| {},
        )
        .unwrap();
    let _ = graph.compile();
}

// ============================================================================
// Lifetime Tests
// ============================================================================

#[test]
fn test_ordered_passes_alias_texture_memory() {
    let (device, mut graph) = graph();
    graph
        .add_pass::<(), _, _>(
            PassDesc::graphics("P1", 64, 64),
            |_, builder| {
                builder.declare_write_texture("A", render_target(64));
                builder.declare_write_buffer(
                    "Link",
                    BufferDescriptor::new(256, BufferUsage::STORAGE)
                        .with_state(ResourceState::UnorderedAccess),
                );
            },
            |_, _, list| list.draw(3, 1),
        )
        .unwrap();
    graph
        .add_pass::<(), _, _>(
            PassDesc::graphics("P2", 64, 64),
            |_, builder| {
                builder.transition_read_buffer("Link", ResourceState::ShaderResource);
                builder.declare_write_texture("B", render_target(64));
            },
            |_, _, list| list.draw(3, 1),
        )
        .unwrap();
    graph.compile().unwrap();
    run_frames(&graph, 1);

    let a = graph.pool().find_texture("A").unwrap();
    let b = graph.pool().find_texture("B").unwrap();
    assert_eq!(a.memory(), b.memory());
    assert_eq!(b.alias_target().unwrap().id(), a.id());
    assert!(device.events().iter().any(|e| matches!(
        e,
        DeviceEvent::CreateTexture { alias_of: Some(h), .. } if Some(*h) == a.handle()
    )));

    let aliasing: Vec<Barrier> = device
        .events()
        .into_iter()
        .filter_map(|e| match e {
            DeviceEvent::Execute { lists, .. } => Some(lists),
            _ => None,
        })
        .flatten()
        .flat_map(|list| list.commands)
        .filter_map(|c| match c {
            Command::Barriers(batch) => Some(batch),
            _ => None,
        })
        .flatten()
        .filter(|b| matches!(b, Barrier::Aliasing { .. }))
        .collect();
    assert_eq!(
        aliasing,
        vec![Barrier::Aliasing {
            before: a.gpu().unwrap(),
            after: b.gpu().unwrap(),
        }]
    );
}

#[test]
fn test_unordered_passes_do_not_alias() {
    let (_device, mut graph) = graph();
    for (pass, texture) in [("Left", "L"), ("Right", "R")] {
        graph
            .add_pass::<(), _, _>(
                PassDesc::graphics(pass, 64, 64),
                move |_, builder| {
                    builder.declare_write_texture(texture, render_target(64));
                },
                |_, _, _| {},
            )
            .unwrap();
    }
    graph.compile().unwrap();
    run_frames(&graph, 3);

    let left = graph.pool().find_texture("L").unwrap();
    let right = graph.pool().find_texture("R").unwrap();
    assert_ne!(left.memory(), right.memory());
}

#[test]
fn test_untouched_resource_is_evicted_after_grace_period() {
    let events = EventBus::new();
    let evicted = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&evicted);
    events.subscribe(move |event| {
        if let FrameEvent::ResourceEvicted { name, frame } = event {
            sink.lock().unwrap().push((name.clone(), *frame));
        }
    });
    let (_device, mut graph) = graph_with(DummyDevice::new(), events);
    graph.compile().unwrap();
    run_frames(&graph, 2);

    let declared_at = graph.frame_index();
    graph
        .pool()
        .declare_texture("Scratch", render_target(32), None, declared_at);

    run_frames(&graph, 6);
    assert_eq!(graph.frame_index(), declared_at + 6);
    assert!(graph.pool().find_texture("Scratch").is_some());

    run_frames(&graph, 1);
    assert!(graph.pool().find_texture("Scratch").is_none());
    assert_eq!(
        *evicted.lock().unwrap(),
        vec![("Scratch".to_string(), declared_at + 7)]
    );
}

// ============================================================================
// Submission Tests
// ============================================================================

#[test]
fn test_cross_queue_frame_submission_order() {
    let (device, mut graph) = graph();
    graph
        .add_pass::<(), _, _>(
            PassDesc::graphics("P1", 64, 64),
            |_, builder| {
                builder.declare_write_texture("T", render_target(64));
            },
            |_, _, list| list.draw(3, 1),
        )
        .unwrap();
    graph
        .add_pass::<(), _, _>(
            PassDesc::compute("P2"),
            |_, builder| {
                builder.transition_read_texture("T", ResourceState::ShaderResource);
            },
            |_, _, list| list.dispatch(8, 8, 1),
        )
        .unwrap();
    graph.compile().unwrap();

    for frame in 0..5 {
        device.clear_events();
        run_frames(&graph, 1);
        let events = queue_events(&device);
        assert_eq!(events.len(), 6, "frame {frame}: {events:?}");

        let DeviceEvent::Execute { queue, lists } = &events[0] else {
            panic!("frame {frame}: expected P1 execution, got {:?}", events[0]);
        };
        assert_eq!(*queue, QueueClass::Graphics);
        assert_eq!(lists[0].name, "P1");

        let DeviceEvent::Signal {
            queue: QueueClass::Graphics,
            fence: signalled,
            value: marker,
        } = events[1]
        else {
            panic!("frame {frame}: expected marker signal, got {:?}", events[1]);
        };
        assert_eq!(
            events[2],
            DeviceEvent::Wait {
                queue: QueueClass::Compute,
                fence: signalled,
                value: marker,
            }
        );

        let DeviceEvent::Execute { queue, lists } = &events[3] else {
            panic!("frame {frame}: expected P2 execution, got {:?}", events[3]);
        };
        assert_eq!(*queue, QueueClass::Compute);
        assert_eq!(lists[0].name, "P2");

        assert_eq!(events[4], DeviceEvent::Present { slot: frame % 3 });
        assert!(matches!(
            events[5],
            DeviceEvent::Signal { queue: QueueClass::Graphics, fence, .. } if fence != signalled
        ));
    }
}

#[test]
fn test_extra_command_lists_follow_their_pass() {
    let (device, mut graph) = graph();
    graph
        .add_pass::<(), _, _>(
            PassDesc::graphics("Main", 64, 64),
            |_, builder| {
                builder.declare_write_texture("Color", render_target(64));
            },
            |_, ctx, list| {
                list.draw(3, 1);
                let mut extra = CommandList::new("Overlay", QueueClass::Graphics);
                extra.draw(6, 1);
                ctx.submit_command_list(extra);
            },
        )
        .unwrap();
    graph.compile().unwrap();
    run_frames(&graph, 1);

    assert_eq!(device.submitted_list_names(), vec!["Main", "Overlay"]);
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ViewConstants {
    exposure: f32,
    frame: u32,
    _pad: [u32; 2],
}

#[test]
fn test_frame_constants_reach_passes() {
    let (device, mut graph) = graph();
    let seen = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&seen);
    graph
        .add_pass::<(), _, _>(
            PassDesc::compute("Exposure"),
            |_, _| {},
            move |_, ctx, _| {
                if ctx.constants::<ViewConstants>().is_some() {
                    sink.fetch_add(1, Ordering::SeqCst);
                }
            },
        )
        .unwrap();
    graph.compile().unwrap();

    run_frames(&graph, 1);
    assert_eq!(seen.load(Ordering::SeqCst), 0);

    let constants = ViewConstants {
        exposure: 1.0,
        frame: 2,
        _pad: [0; 2],
    };
    graph.update_frame_constants(1, &constants).unwrap();
    run_frames(&graph, 1);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(device
        .events()
        .iter()
        .any(|e| matches!(e, DeviceEvent::WriteConstants { len: 16, .. })));
}

// ============================================================================
// Pipeline Tests
// ============================================================================

#[rstest]
#[case::immediate_gpu(Duration::ZERO)]
#[case::slow_gpu(Duration::from_millis(1))]
fn test_pipeline_runs_whole_rounds(#[case] gpu_delay: Duration) {
    let events = EventBus::new();
    let (retired_tx, retired_rx) = mpsc::channel();
    let retired_tx = Mutex::new(retired_tx);
    events.subscribe(move |event| {
        if let FrameEvent::FrameRetired { frame, .. } = event {
            let _ = retired_tx.lock().unwrap().send(*frame);
        }
    });
    let (_device, mut graph) =
        graph_with(DummyDevice::new().with_completion_delay(gpu_delay), events);
    graph
        .add_pass::<(), _, _>(
            PassDesc::graphics("Draw", 64, 64),
            |_, builder| {
                builder.declare_write_texture("Color", render_target(64));
            },
            |_, _, list| list.draw(3, 1),
        )
        .unwrap();
    graph.compile().unwrap();

    let updates = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&updates);
    let mut pipeline = FramePipeline::start(Arc::new(graph), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    for _ in 0..10 {
        retired_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("pipeline stalled");
    }
    pipeline.shutdown();
    assert!(!pipeline.is_running());

    let frames = pipeline.graph().frame_index();
    assert!(frames >= 10);
    assert_eq!(frames % 3, 0, "every thread finishes the same rounds");
    assert_eq!(updates.load(Ordering::SeqCst), frames);
}

#[test]
fn test_pipeline_requires_compiled_graph() {
    let (_device, graph) = graph();
    let result = FramePipeline::start(Arc::new(graph), |_| {});
    assert_eq!(
        result.err(),
        Some(GraphError::NotCompiled)
    );
}

#[test]
fn test_out_of_memory_halts_pipeline() {
    let events = EventBus::new();
    let (halted_tx, halted_rx) = mpsc::channel();
    let halted_tx = Mutex::new(halted_tx);
    events.subscribe(move |event| {
        if let FrameEvent::PipelineHalted { thread, reason } = event {
            let _ = halted_tx.lock().unwrap().send((*thread, reason.clone()));
        }
    });
    let (_device, mut graph) = graph_with(DummyDevice::new(), events);
    graph
        .add_pass::<(), _, _>(
            PassDesc::graphics("Huge", 4096, 4096),
            |_, builder| {
                let desc = TextureDescriptor::new_2d(
                    4096,
                    4096,
                    TextureFormat::Rgba32Float,
                    TextureUsage::RENDER_ATTACHMENT,
                )
                .with_state(ResourceState::RenderTarget);
                builder.declare_write_texture("Huge", desc);
            },
            |_, _, list| list.draw(3, 1),
        )
        .unwrap();
    graph.compile().unwrap();

    let mut pipeline = FramePipeline::start(Arc::new(graph), |_| {}).unwrap();
    let (thread, reason) = halted_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("pipeline never halted");
    assert_eq!(thread, 0);
    assert!(reason.contains("out of memory allocating 'Huge'"), "{reason}");

    pipeline.shutdown();
    assert!(!pipeline.is_running());
    assert!(pipeline.graph().is_halted());
    assert_eq!(pipeline.failure(), Some(reason));
    assert_eq!(pipeline.graph().execute(1), Err(GraphError::Halted));
}
