//! Declaration API handed to pass setup closures.

use std::collections::HashMap;
use std::sync::Arc;

use super::pool::ResourcePool;
use super::resource::{BufferRef, Resource, ResourceId, TextureRef};
use crate::backend::{BufferHandle, TextureHandle};
use crate::error::{fatal, GraphError};
use crate::types::{BufferDescriptor, ResourceKind, ResourceState, TextureDescriptor};

/// Resources one pass reads and writes, and the state it needs each in.
#[derive(Default)]
pub(crate) struct PassResources {
    pub read_buffers: Vec<BufferRef>,
    pub write_buffers: Vec<BufferRef>,
    pub read_textures: Vec<TextureRef>,
    pub write_textures: Vec<TextureRef>,
    pub states: HashMap<ResourceId, ResourceState>,
}

impl PassResources {
    pub fn reads(&self) -> impl Iterator<Item = &Arc<Resource>> {
        self.read_buffers
            .iter()
            .map(BufferRef::arc)
            .chain(self.read_textures.iter().map(TextureRef::arc))
    }

    pub fn writes(&self) -> impl Iterator<Item = &Arc<Resource>> {
        self.write_buffers
            .iter()
            .map(BufferRef::arc)
            .chain(self.write_textures.iter().map(TextureRef::arc))
    }

    /// Every resource in binding order: read buffers, write buffers, read
    /// textures, write textures. A resource listed twice appears once.
    pub fn all(&self) -> Vec<&Arc<Resource>> {
        let ordered = self
            .read_buffers
            .iter()
            .chain(&self.write_buffers)
            .map(BufferRef::arc)
            .chain(
                self.read_textures
                    .iter()
                    .chain(&self.write_textures)
                    .map(TextureRef::arc),
            );
        let mut seen = Vec::new();
        for resource in ordered {
            if !seen.iter().any(|r: &&Arc<Resource>| r.id() == resource.id()) {
                seen.push(resource);
            }
        }
        seen
    }

    pub fn reads_resource(&self, id: ResourceId) -> bool {
        self.reads().any(|r| r.id() == id)
    }

    pub fn writes_resource(&self, id: ResourceId) -> bool {
        self.writes().any(|r| r.id() == id)
    }

    pub fn state_of(&self, id: ResourceId) -> ResourceState {
        self.states.get(&id).copied().unwrap_or_default()
    }

    fn push<R: PartialEq>(list: &mut Vec<R>, resource: R) {
        if !list.contains(&resource) {
            list.push(resource);
        }
    }
}

/// Declares the resources of exactly one pass.
///
/// Every call records the state the resource must be in for this pass and
/// adds it to the pass's read or write list. Declarations are idempotent:
/// a name that is already pooled yields the existing resource.
pub struct PassBuilder<'a> {
    pool: &'a ResourcePool,
    resources: &'a mut PassResources,
    frame: u64,
}

impl<'a> PassBuilder<'a> {
    pub(crate) fn new(pool: &'a ResourcePool, resources: &'a mut PassResources, frame: u64) -> Self {
        Self {
            pool,
            resources,
            frame,
        }
    }

    /// Wrap a buffer owned outside the frame graph.
    ///
    /// With `need_descriptor` set, the buffer gets a CPU descriptor so
    /// passes can bind it through the shader-visible heap.
    pub fn import_buffer(
        &mut self,
        name: &str,
        handle: BufferHandle,
        desc: BufferDescriptor,
        need_descriptor: bool,
    ) -> BufferRef {
        let state = desc.state;
        let buffer = self
            .pool
            .import_buffer(name, handle, desc, need_descriptor, self.frame)
            .unwrap_or_else(|e| fatal(e));
        self.read_buffer(&buffer, state);
        buffer
    }

    /// Wrap a texture owned outside the frame graph.
    pub fn import_texture(
        &mut self,
        name: &str,
        handle: TextureHandle,
        desc: TextureDescriptor,
        need_descriptor: bool,
    ) -> TextureRef {
        let state = desc.state;
        let texture = self
            .pool
            .import_texture(name, handle, desc, need_descriptor, self.frame)
            .unwrap_or_else(|e| fatal(e));
        self.read_texture(&texture, state);
        texture
    }

    /// Declare a pool buffer this pass reads.
    pub fn declare_read_buffer(&mut self, name: &str, desc: BufferDescriptor) -> BufferRef {
        let state = desc.state;
        let buffer = self.pool.declare_buffer(name, desc, None, self.frame);
        self.read_buffer(&buffer, state);
        buffer
    }

    /// Declare a pool buffer this pass reads, uploading `data` into it when
    /// it is first materialized.
    pub fn declare_read_buffer_with_data(
        &mut self,
        name: &str,
        desc: BufferDescriptor,
        data: impl Into<Arc<[u8]>>,
    ) -> BufferRef {
        let state = desc.state;
        let buffer = self
            .pool
            .declare_buffer(name, desc, Some(data.into()), self.frame);
        self.read_buffer(&buffer, state);
        buffer
    }

    /// Declare a pool buffer this pass writes.
    pub fn declare_write_buffer(&mut self, name: &str, desc: BufferDescriptor) -> BufferRef {
        let state = desc.state;
        let buffer = self.pool.declare_buffer(name, desc, None, self.frame);
        self.write_buffer(&buffer, state);
        buffer
    }

    /// Declare a pool texture this pass reads.
    pub fn declare_read_texture(&mut self, name: &str, desc: TextureDescriptor) -> TextureRef {
        let state = desc.state;
        let texture = self.pool.declare_texture(name, desc, None, self.frame);
        self.read_texture(&texture, state);
        texture
    }

    /// Declare a pool texture this pass reads, uploading `data` into it
    /// when it is first materialized.
    pub fn declare_read_texture_with_data(
        &mut self,
        name: &str,
        desc: TextureDescriptor,
        data: impl Into<Arc<[u8]>>,
    ) -> TextureRef {
        let state = desc.state;
        let texture = self
            .pool
            .declare_texture(name, desc, Some(data.into()), self.frame);
        self.read_texture(&texture, state);
        texture
    }

    /// Declare a pool texture this pass writes.
    pub fn declare_write_texture(&mut self, name: &str, desc: TextureDescriptor) -> TextureRef {
        let state = desc.state;
        let texture = self.pool.declare_texture(name, desc, None, self.frame);
        self.write_texture(&texture, state);
        texture
    }

    /// Read a buffer declared by an earlier pass, in `state`.
    ///
    /// # Panics
    ///
    /// Panics if no buffer named `name` was declared or imported.
    pub fn transition_read_buffer(&mut self, name: &str, state: ResourceState) -> BufferRef {
        let buffer = self.lookup_buffer(name);
        self.read_buffer(&buffer, state);
        buffer
    }

    /// Write a buffer declared by an earlier pass, in `state`.
    ///
    /// # Panics
    ///
    /// Panics if no buffer named `name` was declared or imported.
    pub fn transition_write_buffer(&mut self, name: &str, state: ResourceState) -> BufferRef {
        let buffer = self.lookup_buffer(name);
        self.write_buffer(&buffer, state);
        buffer
    }

    /// Read a texture declared by an earlier pass, in `state`.
    ///
    /// # Panics
    ///
    /// Panics if no texture named `name` was declared or imported.
    pub fn transition_read_texture(&mut self, name: &str, state: ResourceState) -> TextureRef {
        let texture = self.lookup_texture(name);
        self.read_texture(&texture, state);
        texture
    }

    /// Write a texture declared by an earlier pass, in `state`.
    ///
    /// # Panics
    ///
    /// Panics if no texture named `name` was declared or imported.
    pub fn transition_write_texture(&mut self, name: &str, state: ResourceState) -> TextureRef {
        let texture = self.lookup_texture(name);
        self.write_texture(&texture, state);
        texture
    }

    fn lookup_buffer(&self, name: &str) -> BufferRef {
        self.pool.find_buffer(name).unwrap_or_else(|| {
            fatal(GraphError::UnknownResource {
                kind: ResourceKind::Buffer,
                name: name.to_string(),
            })
        })
    }

    fn lookup_texture(&self, name: &str) -> TextureRef {
        self.pool.find_texture(name).unwrap_or_else(|| {
            fatal(GraphError::UnknownResource {
                kind: ResourceKind::Texture,
                name: name.to_string(),
            })
        })
    }

    fn read_buffer(&mut self, buffer: &BufferRef, state: ResourceState) {
        self.resources.states.insert(buffer.id(), state);
        PassResources::push(&mut self.resources.read_buffers, buffer.clone());
    }

    fn write_buffer(&mut self, buffer: &BufferRef, state: ResourceState) {
        self.resources.states.insert(buffer.id(), state);
        PassResources::push(&mut self.resources.write_buffers, buffer.clone());
    }

    fn read_texture(&mut self, texture: &TextureRef, state: ResourceState) {
        self.resources.states.insert(texture.id(), state);
        PassResources::push(&mut self.resources.read_textures, texture.clone());
    }

    fn write_texture(&mut self, texture: &TextureRef, state: ResourceState) {
        self.resources.states.insert(texture.id(), state);
        PassResources::push(&mut self.resources.write_textures, texture.clone());
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;
    use crate::config::GraphConfig;
    use crate::events::EventBus;
    use crate::memory::{DescriptorHeaps, ResourceAllocator};
    use crate::types::{BufferUsage, TextureFormat, TextureUsage};

    fn pool() -> ResourcePool {
        let config = GraphConfig::default();
        ResourcePool::new(
            Arc::new(DummyDevice::new()),
            ResourceAllocator::new(&config),
            Arc::new(DescriptorHeaps::new(&config)),
            config.eviction_grace_frames,
            EventBus::new(),
        )
    }

    fn color() -> TextureDescriptor {
        TextureDescriptor::new_2d(32, 32, TextureFormat::Rgba8Unorm, TextureUsage::RENDER_ATTACHMENT)
            .with_state(ResourceState::RenderTarget)
    }

    #[test]
    fn test_declare_write_twice_returns_same_handle() {
        let pool = pool();
        let mut resources = PassResources::default();
        let mut builder = PassBuilder::new(&pool, &mut resources, 0);

        let a = builder.declare_write_texture("color", color());
        let b = builder.declare_write_texture("color", color());
        assert_eq!(a, b);
        assert_eq!(resources.write_textures.len(), 1);
        assert_eq!(resources.state_of(a.id()), ResourceState::RenderTarget);
    }

    #[test]
    fn test_import_twice_returns_same_handle() {
        let pool = pool();
        let mut resources = PassResources::default();
        let mut builder = PassBuilder::new(&pool, &mut resources, 0);
        let desc = BufferDescriptor::new(64, BufferUsage::UNIFORM);

        let a = builder.import_buffer("camera", BufferHandle(5), desc.clone(), false);
        let b = builder.import_buffer("camera", BufferHandle(5), desc, false);
        assert_eq!(a, b);
        assert_eq!(resources.read_buffers.len(), 1);
    }

    #[test]
    fn test_transition_records_requested_state() {
        let pool = pool();
        let mut first = PassResources::default();
        PassBuilder::new(&pool, &mut first, 0).declare_write_texture("color", color());

        let mut second = PassResources::default();
        let t = PassBuilder::new(&pool, &mut second, 0)
            .transition_read_texture("color", ResourceState::ShaderResource);
        assert!(second.reads_resource(t.id()));
        assert!(!second.writes_resource(t.id()));
        assert_eq!(second.state_of(t.id()), ResourceState::ShaderResource);
    }

    #[test]
    #[should_panic(expected = "no buffer named 'missing'")]
    fn test_transition_of_unknown_name_is_fatal() {
        let pool = pool();
        let mut resources = PassResources::default();
        PassBuilder::new(&pool, &mut resources, 0)
            .transition_write_buffer("missing", ResourceState::UnorderedAccess);
    }

    #[test]
    fn test_all_lists_each_resource_once() {
        let pool = pool();
        let mut resources = PassResources::default();
        let mut builder = PassBuilder::new(&pool, &mut resources, 0);
        let t = builder.declare_read_texture("history", color());
        builder.transition_write_texture("history", ResourceState::UnorderedAccess);
        builder.declare_write_buffer("out", BufferDescriptor::new(64, BufferUsage::STORAGE));

        let all = resources.all();
        assert_eq!(all.len(), 2);
        assert_eq!(resources.state_of(t.id()), ResourceState::UnorderedAccess);
    }
}
