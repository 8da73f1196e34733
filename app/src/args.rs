//! Command line arguments.
//!
//! Uses clap for parsing, with help text (`--help`) and validation of the
//! numeric options.

use std::time::Duration;

use clap::Parser;
use framewright_graphics::GraphConfig;

/// Framewright demo arguments.
///
/// # Examples
///
/// ```bash
/// # Show help
/// ./framewright --help
///
/// # Render 600 frames on four task workers
/// ./framewright --frames 600 --workers 4
///
/// # Simulate a GPU that takes 2 ms per frame
/// ./framewright --gpu-latency-ms 2 --verbose
/// ```
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(
    name = "framewright",
    about = "Run a deferred-style frame graph on the triple-buffered pipeline",
    long_about = "Builds a G-buffer, light culling, lighting, tonemap and back buffer copy \
        chain, then renders it on one thread per frame in flight against a recording \
        dummy device.\n\n\
        EXAMPLES:\n\
          # Headless smoke run\n\
          ./framewright --frames 30\n\
        \n\
          # Two frames in flight, single task worker\n\
          ./framewright --threads 2 --workers 1",
    version
)]
pub struct AppArgs {
    /// Exit after rendering this many frames.
    #[arg(long, default_value_t = 300)]
    pub frames: u64,

    /// Task executor workers recording passes (0 picks a quarter of the cores).
    #[arg(long, default_value_t = 0)]
    pub workers: usize,

    /// Frames in flight, one render thread each.
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u64).range(1..=8))]
    pub threads: u64,

    /// Render area width in pixels.
    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    /// Render area height in pixels.
    #[arg(long, default_value_t = 720)]
    pub height: u32,

    /// Milliseconds the dummy device takes to complete a signalled marker.
    #[arg(long, default_value_t = 0)]
    pub gpu_latency_ms: u64,

    /// Log per-frame phases.
    #[arg(long, short)]
    pub verbose: bool,
}

impl Default for AppArgs {
    fn default() -> Self {
        Self {
            frames: 300,
            workers: 0,
            threads: 3,
            width: 1280,
            height: 720,
            gpu_latency_ms: 0,
            verbose: false,
        }
    }
}

impl AppArgs {
    /// Frame graph configuration for these arguments.
    pub fn graph_config(&self) -> GraphConfig {
        GraphConfig::default()
            .with_worker_threads(self.workers)
            .with_frames_in_flight(self.threads as usize)
    }

    /// Simulated GPU completion delay.
    pub fn gpu_latency(&self) -> Duration {
        Duration::from_millis(self.gpu_latency_ms)
    }

    /// Default `env_logger` filter.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}
