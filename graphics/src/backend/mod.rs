//! Device collaborator interface.
//!
//! The frame graph never talks to a GPU API directly. It creates and
//! destroys placed resources, copies descriptors, submits recorded
//! [`CommandList`]s and signals/waits completion markers through the
//! [`GpuDevice`] trait.
//!
//! # Available Devices
//!
//! - `dummy` (default feature): [`DummyDevice`], which records every call
//!   and completes fences immediately or after a configurable delay

mod command;
#[cfg(feature = "dummy")]
mod dummy;
mod sync;

pub use command::{Barrier, Command, CommandList};
#[cfg(feature = "dummy")]
pub use dummy::{DeviceEvent, DummyDevice, RecordedList};
pub use sync::Fence;

use crate::error::DeviceError;
use crate::memory::MemoryLocation;
use crate::types::{BufferDescriptor, QueueClass, TextureDescriptor};

/// Device handle of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

/// Device handle of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

/// Device handle of a completion marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceHandle(pub u64);

/// A buffer or texture as seen by barriers and descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuResource {
    Buffer(BufferHandle),
    Texture(TextureHandle),
}

/// What the frame graph needs from a GPU API wrapper.
///
/// Implementations must be callable from every render thread and task
/// executor worker at once.
pub trait GpuDevice: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &str;

    /// Create a buffer placed at `placement`. `alias_of` names the resource
    /// whose memory the new one overlaps, if any.
    fn create_buffer(
        &self,
        descriptor: &BufferDescriptor,
        placement: &MemoryLocation,
        alias_of: Option<BufferHandle>,
    ) -> Result<BufferHandle, DeviceError>;

    /// Create a texture placed at `placement`.
    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
        placement: &MemoryLocation,
        alias_of: Option<TextureHandle>,
    ) -> Result<TextureHandle, DeviceError>;

    fn destroy_buffer(&self, handle: BufferHandle);

    fn destroy_texture(&self, handle: TextureHandle);

    /// Write a view of `resource` into CPU descriptor slot `cpu_slot`.
    fn create_descriptor(&self, resource: GpuResource, cpu_slot: u64);

    /// Copy CPU descriptor `cpu_slot` into shader-visible slot `gpu_slot`.
    fn copy_descriptor(&self, gpu_slot: u64, cpu_slot: u64);

    /// Write `data` into the constant heap at `offset`.
    fn write_constants(&self, offset: u64, data: &[u8]);

    /// Execute closed command lists on `queue`, in order.
    fn execute_command_lists(
        &self,
        queue: QueueClass,
        lists: &[&CommandList],
    ) -> Result<(), DeviceError>;

    fn create_fence(&self) -> FenceHandle;

    /// Make `queue` set `fence` to `value` once its prior work finishes.
    fn signal(&self, queue: QueueClass, fence: FenceHandle, value: u64);

    /// Make `queue` hold later work until `fence` reaches `value`.
    fn wait(&self, queue: QueueClass, fence: FenceHandle, value: u64);

    /// Last value `fence` reached.
    fn completed_value(&self, fence: FenceHandle) -> u64;

    /// Block the calling thread until `fence` reaches `value`.
    fn wait_for_value(&self, fence: FenceHandle, value: u64);

    /// Present the back buffer of frame slot `slot`.
    fn present(&self, slot: usize) -> Result<(), DeviceError>;
}
