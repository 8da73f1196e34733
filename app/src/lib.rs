//! # Framewright App
//!
//! Demo driver for the frame graph.
//!
//! ## Overview
//!
//! - [`AppArgs`] - Command line options, mapped onto a
//!   [`GraphConfig`](framewright_graphics::GraphConfig)
//! - [`renderer`] - A deferred-style pass chain and its frame constants
//!
//! The `framewright` binary registers the demo passes, runs them on a
//! [`FramePipeline`](framewright_graphics::FramePipeline) until the
//! requested number of frames retired, and reports what happened.

mod args;
pub mod renderer;

pub use args::AppArgs;
pub use renderer::{add_demo_passes, update_constants, CameraConstants, LightConstants};

/// App library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the app subsystem.
///
/// This should be called before using any app functionality.
pub fn init() {
    log::info!("Framewright App v{} initialized", VERSION);
}
