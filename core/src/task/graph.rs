//! Task graph definition.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Work attached to a task node.
pub type TaskFn = Arc<dyn Fn() + Send + Sync>;

/// Handle to a node in a [`TaskGraph`].
///
/// Only valid within the graph that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u32);

impl TaskId {
    fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Position of the node in creation order.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

pub(crate) struct TaskNode {
    pub(crate) name: String,
    pub(crate) work: TaskFn,
    pub(crate) successors: Vec<TaskId>,
    pub(crate) dependents: Vec<TaskId>,
    /// Predecessors that have not finished in the current run.
    pub(crate) unfinished: AtomicU32,
    /// Predecessor count, restored into `unfinished` after each run.
    pub(crate) unfinished_backup: u32,
}

/// A reusable DAG of closures.
///
/// Build the graph once with [`emplace`](Self::emplace) and
/// [`precede`](Self::precede); a [`TaskExecutor`](super::TaskExecutor) can
/// then run it any number of times. Each node keeps a live count of
/// unfinished predecessors plus an immutable backup that resets the count
/// as soon as the node is scheduled, so no rebuild is needed between runs.
///
/// # Example
///
/// ```
/// use framewright_core::task::{TaskExecutor, TaskGraph};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
///
/// let counter = Arc::new(AtomicU32::new(0));
/// let mut graph = TaskGraph::new();
/// let c = Arc::clone(&counter);
/// let a = graph.emplace("a", move || { c.fetch_add(1, Ordering::SeqCst); });
/// let c = Arc::clone(&counter);
/// let b = graph.emplace("b", move || { c.fetch_add(10, Ordering::SeqCst); });
/// graph.precede(a, b);
///
/// let executor = TaskExecutor::new(2).unwrap();
/// executor.run(&graph);
/// executor.run(&graph);
/// assert_eq!(counter.load(Ordering::SeqCst), 22);
/// ```
#[derive(Default)]
pub struct TaskGraph {
    pub(crate) nodes: Vec<TaskNode>,
    /// Held for the duration of a run; the live counters are per graph.
    pub(crate) run_lock: Mutex<()>,
}

impl TaskGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node running `work`.
    pub fn emplace<F>(&mut self, name: impl Into<String>, work: F) -> TaskId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = TaskId::new(self.nodes.len());
        self.nodes.push(TaskNode {
            name: name.into(),
            work: Arc::new(work),
            successors: Vec::new(),
            dependents: Vec::new(),
            unfinished: AtomicU32::new(0),
            unfinished_backup: 0,
        });
        id
    }

    /// Make `before` run strictly before `after`.
    ///
    /// Duplicate edges are ignored.
    pub fn precede(&mut self, before: TaskId, after: TaskId) {
        assert!(before.index() < self.nodes.len(), "Invalid task handle");
        assert!(after.index() < self.nodes.len(), "Invalid task handle");
        assert!(before != after, "Task cannot depend on itself");

        if self.nodes[before.index()].successors.contains(&after) {
            return;
        }
        self.nodes[before.index()].successors.push(after);
        let node = &mut self.nodes[after.index()];
        node.dependents.push(before);
        node.unfinished_backup += 1;
        node.unfinished.store(node.unfinished_backup, Ordering::Relaxed);
    }

    /// Make `after` run strictly after `before`.
    pub fn succeed(&mut self, after: TaskId, before: TaskId) {
        self.precede(before, after);
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Name given to the node.
    pub fn name(&self, id: TaskId) -> &str {
        &self.nodes[id.index()].name
    }

    /// Nodes that wait for `id`.
    pub fn successors(&self, id: TaskId) -> &[TaskId] {
        &self.nodes[id.index()].successors
    }

    /// Nodes `id` waits for.
    pub fn dependents(&self, id: TaskId) -> &[TaskId] {
        &self.nodes[id.index()].dependents
    }

    /// Nodes with no predecessors.
    pub fn sources(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.unfinished_backup == 0)
            .map(|(index, _)| TaskId::new(index))
    }

    /// Returns true if every node can be reached from a source
    /// (i.e. there is no cycle).
    pub fn is_acyclic(&self) -> bool {
        let mut remaining: Vec<u32> = self.nodes.iter().map(|n| n.unfinished_backup).collect();
        let mut ready: Vec<TaskId> = self.sources().collect();
        let mut visited = 0;
        while let Some(id) = ready.pop() {
            visited += 1;
            for &succ in &self.nodes[id.index()].successors {
                remaining[succ.index()] -= 1;
                if remaining[succ.index()] == 0 {
                    ready.push(succ);
                }
            }
        }
        visited == self.nodes.len()
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        for node in &self.nodes {
            list.entry(&(&node.name, &node.successors));
        }
        list.finish()
    }
}
