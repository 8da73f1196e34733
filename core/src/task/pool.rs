//! Pull-based worker pool.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

/// A unit of work for the pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Job>,
    shutdown: bool,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

/// A fixed set of worker threads pulling jobs from one shared queue.
///
/// Workers sleep on a condition variable while the queue is empty. Dropping
/// the pool lets workers finish the queued jobs, then joins them.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Create a pool with `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> io::Result<Self> {
        let shared = Arc::new(Shared::default());
        let mut pool = Self {
            shared,
            workers: Vec::new(),
        };
        for index in 0..num_threads.max(1) {
            let shared = Arc::clone(&pool.shared);
            // On error, `pool` drops and joins the workers already spawned.
            let handle = thread::Builder::new()
                .name(format!("framewright-worker-{index}"))
                .spawn(move || worker_loop(&shared))?;
            pool.workers.push(handle);
        }
        log::debug!("thread pool started with {} workers", pool.workers.len());
        Ok(pool)
    }

    /// Worker count used when none is requested: a quarter of the available
    /// cores, at least one.
    pub fn default_thread_count() -> usize {
        let cores = thread::available_parallelism().map_or(1, |n| n.get());
        (cores / 4).max(1)
    }

    /// Create a pool sized by [`default_thread_count`](Self::default_thread_count).
    pub fn default_threads() -> io::Result<Self> {
        Self::new(Self::default_thread_count())
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job. Some idle worker picks it up.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.queue.lock().jobs.push_back(Box::new(job));
        self.shared.available.notify_one();
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.queue.lock().shutdown = true;
        self.shared.available.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("thread pool worker panicked outside a job");
            }
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("threads", &self.workers.len())
            .finish_non_exhaustive()
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                if queue.shutdown {
                    return;
                }
                shared.available.wait(&mut queue);
            }
        };
        job();
    }
}
