//! Descriptors, formats and GPU states for frame graph resources.

mod buffer;
mod common;
mod state;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage, HeapType};
pub use common::{Extent3d, Viewport};
pub use state::{QueueClass, ResourceKind, ResourceState};
pub use texture::{TextureDescriptor, TextureFormat, TextureUsage};
