//! Triple-buffered frame pipeline.
//!
//! [`FramePipeline`] runs one long-lived render thread per frame in flight.
//! Thread `i` only ever drives frame slot `i`, calling
//! [`FrameGraph::execute`] in a loop. The hand-offs inside `execute` make
//! the threads take turns phase by phase, so with three frames in flight
//! recording, submission and the GPU wait of consecutive frames overlap:
//!
//! ```text
//! thread 0: [record F1] [submit F1] [wait F1]            [record F4] ...
//! thread 1:             [record F2] [submit F2] [wait F2]            ...
//! thread 2:                         [record F3] [submit F3] [wait F3]
//!
//! Time ─────────────────────────────────────────────────────────────►
//! ```
//!
//! # Shutdown
//!
//! A thread that stops early would leave the next one waiting forever for
//! its hand-off, so quitting is agreed on per round: once a quit is
//! requested, no thread starts a round beyond the highest one already
//! started, and every thread finishes that round before leaving.
//!
//! ```text
//! [request_quit]
//!         │
//!         ▼
//! ┌──────────────────────┐
//! │ stop round = last    │  Rounds already started still complete
//! │ started round + 1    │
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐
//! │ poll active flags    │  shutdown() yields until every thread left
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐
//! │ join threads         │
//! └──────────────────────┘
//! ```
//!
//! # Fatal errors
//!
//! A render thread that panics or gets an error from `execute` halts the
//! graph: every thread parked in a hand-off is released, all of them leave
//! their loop, and [`FramePipeline::failure`] reports what went wrong.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::error::GraphError;
use crate::events::FrameEvent;
use crate::graph::FrameGraph;

#[derive(Debug, Default)]
struct Rounds {
    /// First round no thread may start.
    stop_at: Option<u64>,
    /// One past the highest round any thread started.
    next: u64,
}

struct Control {
    rounds: Mutex<Rounds>,
    active: Vec<AtomicBool>,
    /// First fatal error, as reported by the thread that hit it.
    failure: Mutex<Option<String>>,
}

impl Control {
    /// Claim `round` for a thread. Returns false once the pipeline stops
    /// before it.
    fn try_enter(&self, round: u64) -> bool {
        let mut rounds = self.rounds.lock();
        if rounds.stop_at.is_some_and(|stop| round >= stop) {
            return false;
        }
        rounds.next = rounds.next.max(round + 1);
        true
    }

    /// Returns true if this call made the request.
    fn request_quit(&self) -> bool {
        let mut rounds = self.rounds.lock();
        if rounds.stop_at.is_some() {
            return false;
        }
        rounds.stop_at = Some(rounds.next);
        true
    }

    /// Record the first failure and stop every later round. Returns true
    /// for the first failure only.
    fn fail(&self, reason: String) -> bool {
        let mut failure = self.failure.lock();
        if failure.is_some() {
            return false;
        }
        *failure = Some(reason);
        self.rounds.lock().stop_at = Some(0);
        true
    }

    fn any_active(&self) -> bool {
        self.active.iter().any(|a| a.load(Ordering::Acquire))
    }
}

/// Clears a thread's active flag however its loop exits.
struct ActiveGuard<'a>(&'a AtomicBool);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Render threads driving a compiled [`FrameGraph`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use framewright_graphics::{DummyDevice, EventBus, FrameGraph, FramePipeline, GraphConfig};
///
/// let device = Arc::new(DummyDevice::new());
/// let mut graph = FrameGraph::new(device, GraphConfig::default(), EventBus::new()).unwrap();
/// graph.compile().unwrap();
///
/// let mut pipeline = FramePipeline::start(Arc::new(graph), |_thread_index| {}).unwrap();
/// pipeline.shutdown();
/// ```
pub struct FramePipeline {
    graph: Arc<FrameGraph>,
    control: Arc<Control>,
    threads: Vec<JoinHandle<()>>,
}

impl FramePipeline {
    /// Spawn one render thread per frame in flight.
    ///
    /// Each thread loops `update(thread_index)` then
    /// `graph.execute(thread_index)` until a quit is requested.
    pub fn start<F>(graph: Arc<FrameGraph>, update: F) -> Result<Self, GraphError>
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        if !graph.is_compiled() {
            return Err(GraphError::NotCompiled);
        }
        let frames = graph.frames_in_flight();
        let control = Arc::new(Control {
            rounds: Mutex::new(Rounds::default()),
            active: (0..frames).map(|_| AtomicBool::new(true)).collect(),
            failure: Mutex::new(None),
        });
        let update = Arc::new(update);

        let mut pipeline = Self {
            graph,
            control,
            threads: Vec::with_capacity(frames),
        };
        for index in 0..frames {
            let graph = Arc::clone(&pipeline.graph);
            let control = Arc::clone(&pipeline.control);
            let update = Arc::clone(&update);
            let spawned = thread::Builder::new()
                .name(format!("framewright-render-{index}"))
                .spawn(move || render_loop(index, &graph, &control, &*update));
            match spawned {
                Ok(handle) => pipeline.threads.push(handle),
                Err(e) => {
                    // Threads that never started must not hold up the others.
                    for active in &pipeline.control.active[index..] {
                        active.store(false, Ordering::Release);
                    }
                    pipeline.shutdown();
                    return Err(GraphError::ThreadSpawn(e.to_string()));
                }
            }
        }
        log::info!("FramePipeline: started {frames} render threads");
        Ok(pipeline)
    }

    /// Ask every render thread to stop after the rounds already started.
    pub fn request_quit(&self) {
        if self.control.request_quit() {
            log::info!("FramePipeline: quit requested");
            self.graph.events().emit(FrameEvent::QuitRequested);
        }
    }

    /// Returns true while any render thread is still running.
    pub fn is_running(&self) -> bool {
        self.control.any_active()
    }

    /// The fatal error that stopped the pipeline, if any.
    pub fn failure(&self) -> Option<String> {
        self.control.failure.lock().clone()
    }

    /// The graph the threads drive.
    pub fn graph(&self) -> &Arc<FrameGraph> {
        &self.graph
    }

    /// Request a quit, wait for every render thread to leave, and join them.
    pub fn shutdown(&mut self) {
        self.request_quit();
        while self.control.any_active() {
            thread::yield_now();
        }
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::error!("FramePipeline: a render thread panicked");
            }
        }
        log::info!(
            "FramePipeline: stopped after frame {}",
            self.graph.frame_index()
        );
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for FramePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePipeline")
            .field("threads", &self.threads.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn render_loop(index: usize, graph: &FrameGraph, control: &Control, update: &dyn Fn(usize)) {
    let _active = ActiveGuard(&control.active[index]);
    log::debug!("FramePipeline: render thread {index} started");

    let mut round = 0;
    while control.try_enter(round) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            update(index);
            graph.execute(index)
        }));
        let reason = match result {
            Ok(Ok(())) => {
                round += 1;
                continue;
            }
            Ok(Err(GraphError::Halted)) => break,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };
        log::error!("FramePipeline: render thread {index} failed: {reason}");
        if control.fail(reason.clone()) {
            graph.halt();
            graph.events().emit(FrameEvent::PipelineHalted {
                thread: index,
                reason,
            });
        }
        break;
    }
    log::debug!("FramePipeline: render thread {index} finished {round} rounds");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "render thread panicked".to_string()
    }
}
