//! GPU resource states and queue classes.

use std::fmt;

/// The state a resource must be in while a pass uses it.
///
/// Transition barriers are recorded whenever a pass needs a resource in a
/// state different from the one it was last left in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    /// Initial state of freshly created resources.
    #[default]
    Common,
    /// Bound as a vertex or constant buffer.
    VertexAndConstant,
    /// Bound as an index buffer.
    IndexBuffer,
    /// Read as indirect draw or dispatch arguments.
    IndirectArgument,
    /// Color attachment.
    RenderTarget,
    /// Depth attachment with writes enabled.
    DepthWrite,
    /// Depth attachment, read-only.
    DepthRead,
    /// Sampled or read from any shader stage.
    ShaderResource,
    /// Read-write storage access.
    UnorderedAccess,
    /// Copy source.
    CopySrc,
    /// Copy destination.
    CopyDst,
    /// CPU-visible upload memory.
    GenericRead,
    /// Handed to the presentation engine.
    Present,
}

impl ResourceState {
    /// Returns true if the GPU may write the resource in this state.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::RenderTarget | Self::DepthWrite | Self::UnorderedAccess | Self::CopyDst
        )
    }
}

/// The GPU queue a pass is submitted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueueClass {
    /// No render pass setup; submitted on the graphics queue.
    None,
    /// Draws, with viewport and render pass markers.
    #[default]
    Graphics,
    /// Dispatches.
    Compute,
    /// Copies.
    Copy,
}

impl QueueClass {
    /// The hardware queue command lists of this class are executed on.
    pub fn submit_queue(self) -> Self {
        match self {
            Self::None => Self::Graphics,
            other => other,
        }
    }
}

impl fmt::Display for QueueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Graphics => "graphics",
            Self::Compute => "compute",
            Self::Copy => "copy",
        };
        f.write_str(name)
    }
}

/// Whether a pool resource is a buffer or a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Texture,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer => f.write_str("buffer"),
            Self::Texture => f.write_str("texture"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_states() {
        assert!(ResourceState::RenderTarget.is_write());
        assert!(ResourceState::UnorderedAccess.is_write());
        assert!(!ResourceState::ShaderResource.is_write());
        assert!(!ResourceState::DepthRead.is_write());
    }

    #[test]
    fn test_none_submits_on_graphics() {
        assert_eq!(QueueClass::None.submit_queue(), QueueClass::Graphics);
        assert_eq!(QueueClass::Compute.submit_queue(), QueueClass::Compute);
    }
}
