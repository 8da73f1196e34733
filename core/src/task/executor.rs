//! Runs a [`TaskGraph`] on a [`ThreadPool`].

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::mpsc;

use super::graph::{TaskGraph, TaskId};
use super::pool::ThreadPool;

type Completion = (TaskId, Result<(), Box<dyn Any + Send>>);

/// Executes task graphs in dependency order.
///
/// `run` seeds the graph's source nodes into the pool, then acts as the
/// single coordinator: it pops finished nodes off a completion queue,
/// decrements each successor's unfinished-predecessor count, and submits
/// successors that reach zero (restoring their count from the backup so
/// the graph can be replayed).
///
/// A panic inside a task is caught on the worker, the in-flight tasks are
/// drained, the counters are restored, and the panic is resumed on the
/// thread that called `run`.
#[derive(Debug)]
pub struct TaskExecutor {
    pool: ThreadPool,
}

impl TaskExecutor {
    /// Create an executor with `num_threads` workers; `0` picks
    /// [`ThreadPool::default_thread_count`].
    pub fn new(num_threads: usize) -> io::Result<Self> {
        let pool = if num_threads == 0 {
            ThreadPool::default_threads()?
        } else {
            ThreadPool::new(num_threads)?
        };
        Ok(Self { pool })
    }

    /// Number of pool workers.
    pub fn thread_count(&self) -> usize {
        self.pool.thread_count()
    }

    /// Run every node of `graph` exactly once, honoring all edges.
    ///
    /// Blocks until the whole graph has finished. Concurrent runs of the
    /// same graph are serialized.
    ///
    /// # Panics
    ///
    /// Panics if the graph has a cycle, and re-raises the first panic of
    /// any task.
    pub fn run(&self, graph: &TaskGraph) {
        if graph.is_empty() {
            return;
        }
        assert!(graph.is_acyclic(), "Task graph contains a cycle");

        let _running = graph.run_lock.lock();
        let (done_tx, done_rx) = mpsc::channel::<Completion>();

        let mut in_flight = 0usize;
        let mut remaining = graph.len();
        let mut failure: Option<Box<dyn Any + Send>> = None;

        for id in graph.sources() {
            self.notify(graph, id, &done_tx);
            in_flight += 1;
        }

        while in_flight > 0 {
            let Ok((id, result)) = done_rx.recv() else {
                // Unreachable while `done_tx` is alive in this frame.
                break;
            };
            in_flight -= 1;
            remaining -= 1;

            if let Err(payload) = result {
                log::error!("task '{}' panicked", graph.name(id));
                failure.get_or_insert(payload);
            }
            if failure.is_some() {
                continue;
            }

            for &succ in graph.successors(id) {
                let node = &graph.nodes[succ.index()];
                if node.unfinished.fetch_sub(1, Ordering::AcqRel) == 1 {
                    node.unfinished
                        .store(node.unfinished_backup, Ordering::Release);
                    self.notify(graph, succ, &done_tx);
                    in_flight += 1;
                }
            }
        }

        if let Some(payload) = failure {
            for node in &graph.nodes {
                node.unfinished
                    .store(node.unfinished_backup, Ordering::Release);
            }
            panic::resume_unwind(payload);
        }
        debug_assert_eq!(remaining, 0);
    }

    fn notify(&self, graph: &TaskGraph, id: TaskId, done: &mpsc::Sender<Completion>) {
        let work = graph.nodes[id.index()].work.clone();
        let done = done.clone();
        self.pool.submit(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| (*work)()));
            // The coordinator only drops the receiver after draining.
            let _ = done.send((id, result));
        });
    }
}
