//! # Framewright Core
//!
//! Thread-safe building blocks for the frame graph, with no GPU knowledge:
//!
//! - [`lock_list`] - hand-over-hand locked linked list
//! - [`alloc`] - buddy, segregated free-list, ring and index free-list allocators
//! - [`task`] - task graph, thread pool and executor
//! - [`ThreadCtrl`] - flag-ring rendezvous used to hand frames between threads

pub mod alloc;
pub mod error;
pub mod lock_list;
pub mod task;
pub mod thread_ctrl;

pub use error::AllocError;
pub use thread_ctrl::ThreadCtrl;

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the crate version.
pub fn init() {
    log::info!("Framewright Core v{} initialized", VERSION);
}
