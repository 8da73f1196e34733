use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Instant;

use clap::Parser;
use parking_lot::Mutex;

use framewright_app::{add_demo_passes, update_constants, AppArgs};
use framewright_graphics::{
    DummyDevice, EventBus, FrameEvent, FrameGraph, FramePipeline, GraphError,
};

#[derive(Default)]
struct Stats {
    retired: AtomicU64,
    evicted: AtomicU64,
}

fn run(args: &AppArgs) -> Result<(), GraphError> {
    framewright_core::init();
    framewright_graphics::init();
    framewright_app::init();

    let stats = Arc::new(Stats::default());
    let (done_tx, done_rx) = mpsc::channel();
    let done_tx = Mutex::new(Some(done_tx));
    let events = EventBus::new();
    {
        let stats = Arc::clone(&stats);
        let target = args.frames;
        events.subscribe(move |event| match event {
            FrameEvent::FrameRetired { .. } => {
                let retired = stats.retired.fetch_add(1, Ordering::Relaxed) + 1;
                if retired >= target {
                    if let Some(tx) = done_tx.lock().take() {
                        let _ = tx.send(());
                    }
                }
            }
            FrameEvent::ResourceEvicted { .. } => {
                stats.evicted.fetch_add(1, Ordering::Relaxed);
            }
            FrameEvent::PipelineHalted { .. } => {
                if let Some(tx) = done_tx.lock().take() {
                    let _ = tx.send(());
                }
            }
            _ => {}
        });
    }

    let device = Arc::new(DummyDevice::new().with_completion_delay(args.gpu_latency()));
    let mut graph = FrameGraph::new(device.clone(), args.graph_config(), events)?;
    add_demo_passes(&mut graph, args.width, args.height)?;
    graph.compile()?;
    let graph = Arc::new(graph);

    let aspect = args.width as f32 / args.height.max(1) as f32;
    let constants_graph = Arc::clone(&graph);
    let started = Instant::now();
    let mut pipeline = FramePipeline::start(Arc::clone(&graph), move |thread_index| {
        if let Err(e) = update_constants(&constants_graph, thread_index, aspect) {
            log::error!("failed to stage frame constants: {e}");
        }
    })?;

    if args.frames > 0 && done_rx.recv().is_err() {
        log::warn!("event bus closed before {} frames retired", args.frames);
    }
    pipeline.shutdown();
    let elapsed = started.elapsed();
    if let Some(reason) = pipeline.failure() {
        log::error!("render pipeline stopped: {reason}");
        return Err(GraphError::Halted);
    }

    let frames = graph.frame_index();
    log::info!(
        "rendered {frames} frames in {:.2?} ({:.1} fps), {} retired, {} evictions",
        elapsed,
        frames as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        stats.retired.load(Ordering::Relaxed),
        stats.evicted.load(Ordering::Relaxed)
    );
    log::info!(
        "pool holds {} buffers and {} textures, {} device resources alive",
        graph.pool().buffer_count(),
        graph.pool().texture_count(),
        device.live_resource_count()
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = AppArgs::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_filter()))
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
