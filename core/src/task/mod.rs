//! Dependency-graph task execution.
//!
//! - [`TaskGraph`] - a DAG of closures, built once and replayed
//! - [`TaskExecutor`] - runs a graph on a pull-based [`ThreadPool`]

mod executor;
mod graph;
mod pool;

pub use executor::TaskExecutor;
pub use graph::{TaskFn, TaskGraph, TaskId};
pub use pool::{Job, ThreadPool};
