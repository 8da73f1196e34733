//! Recorded command lists.

use std::sync::Arc;

use super::{BufferHandle, GpuResource, TextureHandle};
use crate::types::{QueueClass, ResourceState, Viewport};

/// A resource barrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Barrier {
    /// Move `resource` from `before` to `after`.
    Transition {
        resource: GpuResource,
        before: ResourceState,
        after: ResourceState,
    },
    /// `after` starts using memory `before` occupied.
    Aliasing {
        before: GpuResource,
        after: GpuResource,
    },
}

/// One recorded command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// A batch of barriers flushed together.
    Barriers(Vec<Barrier>),
    /// Initial contents for a freshly created resource.
    Upload {
        target: GpuResource,
        data: Arc<[u8]>,
    },
    SetViewport(Viewport),
    BeginRenderPass {
        color_targets: Vec<TextureHandle>,
        depth_target: Option<TextureHandle>,
    },
    EndRenderPass,
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyBuffer {
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    },
    CopyTexture {
        src: TextureHandle,
        dst: TextureHandle,
    },
}

/// Commands recorded for one queue.
///
/// Barriers are batched: [`transition`](Self::transition) and
/// [`aliasing_barrier`](Self::aliasing_barrier) queue a barrier, and
/// [`flush_barriers`](Self::flush_barriers) (or any other command) emits
/// the pending batch as a single [`Command::Barriers`].
#[derive(Debug, Clone)]
pub struct CommandList {
    name: String,
    queue: QueueClass,
    commands: Vec<Command>,
    pending: Vec<Barrier>,
    closed: bool,
}

impl CommandList {
    /// Create an empty, open list.
    pub fn new(name: impl Into<String>, queue: QueueClass) -> Self {
        Self {
            name: name.into(),
            queue,
            commands: Vec::new(),
            pending: Vec::new(),
            closed: false,
        }
    }

    /// Name of the pass the list belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue the list is submitted to.
    pub fn queue(&self) -> QueueClass {
        self.queue
    }

    /// Drop everything recorded and reopen the list.
    pub fn reset(&mut self) {
        self.commands.clear();
        self.pending.clear();
        self.closed = false;
    }

    /// Flush pending barriers and stop recording.
    pub fn close(&mut self) {
        self.flush_barriers();
        self.closed = true;
    }

    /// Returns true once recording finished.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Recorded commands, not including pending barriers.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Queue a state transition. Transitions to the current state are
    /// dropped.
    pub fn transition(&mut self, resource: GpuResource, before: ResourceState, after: ResourceState) {
        if before != after {
            self.pending.push(Barrier::Transition {
                resource,
                before,
                after,
            });
        }
    }

    /// Queue an aliasing barrier from `before` to `after`.
    pub fn aliasing_barrier(&mut self, before: GpuResource, after: GpuResource) {
        self.pending.push(Barrier::Aliasing { before, after });
    }

    /// Emit pending barriers as one batch.
    pub fn flush_barriers(&mut self) {
        if !self.pending.is_empty() {
            let batch = std::mem::take(&mut self.pending);
            self.commands.push(Command::Barriers(batch));
        }
    }

    /// Copy `data` into `target`.
    pub fn upload(&mut self, target: GpuResource, data: Arc<[u8]>) {
        self.push(Command::Upload { target, data });
    }

    /// Set the viewport for later draws.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.push(Command::SetViewport(viewport));
    }

    /// Bind color and depth targets.
    pub fn begin_render_pass(
        &mut self,
        color_targets: Vec<TextureHandle>,
        depth_target: Option<TextureHandle>,
    ) {
        self.push(Command::BeginRenderPass {
            color_targets,
            depth_target,
        });
    }

    /// Unbind the render targets.
    pub fn end_render_pass(&mut self) {
        self.push(Command::EndRenderPass);
    }

    /// Draw `vertex_count` vertices, `instance_count` times.
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.push(Command::Draw {
            vertex_count,
            instance_count,
        });
    }

    /// Dispatch an `x` by `y` by `z` grid of workgroups.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.push(Command::Dispatch { x, y, z });
    }

    /// Copy `size` bytes between buffers.
    pub fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, size: u64) {
        self.push(Command::CopyBuffer { src, dst, size });
    }

    /// Copy a whole texture.
    pub fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) {
        self.push(Command::CopyTexture { src, dst });
    }

    /// Every barrier recorded so far, flushed or not, in order.
    pub fn barriers(&self) -> impl Iterator<Item = &Barrier> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                Command::Barriers(batch) => Some(batch.iter()),
                _ => None,
            })
            .flatten()
            .chain(self.pending.iter())
    }

    /// Number of aliasing barriers recorded.
    pub fn aliasing_barrier_count(&self) -> usize {
        self.barriers()
            .filter(|b| matches!(b, Barrier::Aliasing { .. }))
            .count()
    }

    fn push(&mut self, command: Command) {
        debug_assert!(!self.closed, "recording into closed list '{}'", self.name);
        self.flush_barriers();
        self.commands.push(command);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tex(id: u64) -> GpuResource {
        GpuResource::Texture(TextureHandle(id))
    }

    #[test]
    fn test_barriers_batch_until_flush() {
        let mut list = CommandList::new("pass", QueueClass::Graphics);
        list.transition(tex(1), ResourceState::Common, ResourceState::RenderTarget);
        list.aliasing_barrier(tex(2), tex(1));
        assert!(list.commands().is_empty());
        assert_eq!(list.barriers().count(), 2);

        list.draw(3, 1);
        assert_eq!(list.commands().len(), 2);
        assert!(matches!(&list.commands()[0], Command::Barriers(b) if b.len() == 2));
        assert_eq!(list.aliasing_barrier_count(), 1);
    }

    #[test]
    fn test_redundant_transition_dropped() {
        let mut list = CommandList::new("pass", QueueClass::Compute);
        list.transition(tex(1), ResourceState::ShaderResource, ResourceState::ShaderResource);
        list.close();
        assert!(list.commands().is_empty());
        assert!(list.is_closed());
    }

    #[test]
    fn test_reset_reopens() {
        let mut list = CommandList::new("pass", QueueClass::Copy);
        list.copy_texture(TextureHandle(1), TextureHandle(2));
        list.close();
        list.reset();
        assert!(!list.is_closed());
        assert!(list.commands().is_empty());
    }
}
