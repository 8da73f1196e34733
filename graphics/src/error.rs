//! Frame graph error types.

use framewright_core::AllocError;

use crate::types::ResourceKind;

/// Errors reported by a [`GpuDevice`](crate::backend::GpuDevice) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// The device could not create a resource.
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),
    /// Command list submission was rejected.
    #[error("submission failed: {0}")]
    SubmissionFailed(String),
    /// Presenting the frame failed.
    #[error("present failed: {0}")]
    PresentFailed(String),
    /// The device was lost.
    #[error("GPU device lost")]
    DeviceLost,
}

/// Errors that can occur while building or running a frame graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A transition named a resource that was never declared or imported.
    #[error("no {kind} named '{name}' in the resource pool")]
    UnknownResource { kind: ResourceKind, name: String },
    /// A GPU heap could not satisfy an allocation.
    #[error("out of memory allocating '{name}': {source}")]
    OutOfMemory {
        name: String,
        #[source]
        source: AllocError,
    },
    /// A descriptor heap is exhausted.
    #[error("{0} descriptor heap exhausted")]
    DescriptorsExhausted(&'static str),
    /// The device collaborator failed.
    #[error(transparent)]
    Device(#[from] DeviceError),
    /// `execute` was called before `compile`.
    #[error("frame graph has not been compiled")]
    NotCompiled,
    /// `add_pass`, `setup` or `compile` was called after `compile`.
    #[error("frame graph is already compiled")]
    AlreadyCompiled,
    /// A thread index outside the frame-in-flight range.
    #[error("thread index {index} out of range for {frames} frames in flight")]
    InvalidThreadIndex { index: usize, frames: usize },
    /// A configuration value is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The task executor or a render thread could not be started.
    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(String),
    /// Transient memory of a finished frame could not be recycled.
    #[error("failed to recycle frame memory: {0}")]
    Recycle(AllocError),
    /// The graph was halted after a fatal error on another thread.
    #[error("frame graph halted")]
    Halted,
}

/// Log a fatal wiring or exhaustion error and abort the frame.
#[track_caller]
pub(crate) fn fatal(error: GraphError) -> ! {
    log::error!("{error}");
    panic!("{error}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphError::UnknownResource {
            kind: ResourceKind::Texture,
            name: "GBuffer".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "no texture named 'GBuffer' in the resource pool"
        );

        let err = GraphError::InvalidThreadIndex {
            index: 4,
            frames: 3,
        };
        assert_eq!(
            err.to_string(),
            "thread index 4 out of range for 3 frames in flight"
        );
    }

    #[test]
    fn test_device_error_converts() {
        let err: GraphError = DeviceError::DeviceLost.into();
        assert_eq!(err.to_string(), "GPU device lost");
    }

    #[test]
    #[should_panic(expected = "frame graph has not been compiled")]
    fn test_fatal_panics_with_message() {
        fatal(GraphError::NotCompiled);
    }
}
