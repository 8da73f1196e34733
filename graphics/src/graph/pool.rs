//! The resource pool: every buffer and texture a frame graph has declared.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use framewright_core::lock_list::LockCoupledList;

use super::resource::{Binding, BufferRef, Resource, ResourceDesc, ResourceId, TextureRef};
use crate::backend::{BufferHandle, CommandList, GpuDevice, GpuResource, TextureHandle};
use crate::error::GraphError;
use crate::events::{EventBus, FrameEvent};
use crate::memory::{DescriptorHeaps, ResourceAllocator};
use crate::types::{BufferDescriptor, ResourceKind, TextureDescriptor};

/// Owns all resources across frames, materializes them lazily and evicts
/// the ones no frame has touched for a while.
///
/// Buffers and textures live in separate lock-coupled lists, so lookups,
/// inserts and evictions from different frame threads only contend on
/// the nodes they are passing over.
pub struct ResourcePool {
    buffers: LockCoupledList<Arc<Resource>>,
    textures: LockCoupledList<Arc<Resource>>,
    next_id: AtomicU64,
    grace_frames: u64,
    device: Arc<dyn GpuDevice>,
    memory: ResourceAllocator,
    descriptors: Arc<DescriptorHeaps>,
    events: EventBus,
}

impl ResourcePool {
    /// Empty pool placing resources in `memory`.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        memory: ResourceAllocator,
        descriptors: Arc<DescriptorHeaps>,
        grace_frames: u64,
        events: EventBus,
    ) -> Self {
        Self {
            buffers: LockCoupledList::new(),
            textures: LockCoupledList::new(),
            next_id: AtomicU64::new(1),
            grace_frames,
            device,
            memory,
            descriptors,
            events,
        }
    }

    /// Look up a pooled buffer by name.
    pub fn find_buffer(&self, name: &str) -> Option<BufferRef> {
        self.find(ResourceKind::Buffer, name).map(BufferRef)
    }

    /// Look up a pooled texture by name.
    pub fn find_texture(&self, name: &str) -> Option<TextureRef> {
        self.find(ResourceKind::Texture, name).map(TextureRef)
    }

    pub(crate) fn find(&self, kind: ResourceKind, name: &str) -> Option<Arc<Resource>> {
        self.list(kind)
            .find_map(|r| (r.name() == name).then(|| Arc::clone(r)))
    }

    /// Declare a pool-owned buffer, or return the one already using `name`.
    pub fn declare_buffer(
        &self,
        name: &str,
        desc: BufferDescriptor,
        initial_data: Option<Arc<[u8]>>,
        frame: u64,
    ) -> BufferRef {
        let desc = if desc.label.is_none() {
            desc.with_label(name)
        } else {
            desc
        };
        BufferRef(self.declare(name, ResourceDesc::Buffer(desc), initial_data, frame))
    }

    /// Declare a pool-owned texture, or return the one already using `name`.
    pub fn declare_texture(
        &self,
        name: &str,
        desc: TextureDescriptor,
        initial_data: Option<Arc<[u8]>>,
        frame: u64,
    ) -> TextureRef {
        let desc = if desc.label.is_none() {
            desc.with_label(name)
        } else {
            desc
        };
        TextureRef(self.declare(name, ResourceDesc::Texture(desc), initial_data, frame))
    }

    fn declare(
        &self,
        name: &str,
        desc: ResourceDesc,
        initial_data: Option<Arc<[u8]>>,
        frame: u64,
    ) -> Arc<Resource> {
        let kind = desc.kind();
        let declared = self.list(kind).find_map_or_push_back(
            |r| (r.name() == name).then(|| Arc::clone(r)),
            || {
                let resource = Arc::new(Resource::declared(
                    self.allocate_id(),
                    name,
                    desc.clone(),
                    initial_data,
                    frame,
                ));
                log::trace!("ResourcePool: declared {kind} '{name}' as {:?}", resource.id());
                Ok::<_, Infallible>((Arc::clone(&resource), resource))
            },
        );
        let resource = match declared {
            Ok(resource) => resource,
            Err(never) => match never {},
        };
        if resource.desc() != &desc {
            log::warn!(
                "ResourcePool: {kind} '{name}' re-declared with a different descriptor, keeping the first"
            );
        }
        resource
    }

    /// Wrap an externally owned buffer, or return the one already using `name`.
    pub fn import_buffer(
        &self,
        name: &str,
        handle: BufferHandle,
        desc: BufferDescriptor,
        need_descriptor: bool,
        frame: u64,
    ) -> Result<BufferRef, GraphError> {
        self.import(
            name,
            GpuResource::Buffer(handle),
            ResourceDesc::Buffer(desc),
            need_descriptor,
            frame,
        )
        .map(BufferRef)
    }

    /// Wrap an externally owned texture, or return the one already using `name`.
    pub fn import_texture(
        &self,
        name: &str,
        handle: TextureHandle,
        desc: TextureDescriptor,
        need_descriptor: bool,
        frame: u64,
    ) -> Result<TextureRef, GraphError> {
        self.import(
            name,
            GpuResource::Texture(handle),
            ResourceDesc::Texture(desc),
            need_descriptor,
            frame,
        )
        .map(TextureRef)
    }

    fn import(
        &self,
        name: &str,
        gpu: GpuResource,
        desc: ResourceDesc,
        need_descriptor: bool,
        frame: u64,
    ) -> Result<Arc<Resource>, GraphError> {
        let kind = desc.kind();
        self.list(kind).find_map_or_push_back(
            |r| (r.name() == name).then(|| Arc::clone(r)),
            || {
                let descriptor = if need_descriptor {
                    let descriptor = self.descriptors.allocate_cpu()?;
                    self.device.create_descriptor(gpu, descriptor.index());
                    Some(descriptor)
                } else {
                    None
                };
                let binding = Binding {
                    gpu,
                    lease: None,
                    descriptor,
                };
                let resource = Arc::new(Resource::imported(
                    self.allocate_id(),
                    name,
                    desc,
                    binding,
                    frame,
                ));
                log::debug!("ResourcePool: imported {kind} '{name}' ({gpu:?})");
                Ok((Arc::clone(&resource), resource))
            },
        )
    }

    /// Make `resource` usable by the pass recording into `list`.
    ///
    /// A resource with no memory is placed over an idle alias-compatible
    /// resource when `may_alias` accepts one, and gets fresh memory
    /// otherwise. A resource that already has memory but went idle is
    /// reactivated behind an aliasing barrier against its chain partner.
    pub(crate) fn allocate(
        &self,
        resource: &Arc<Resource>,
        list: &mut CommandList,
        may_alias: &dyn Fn(&Resource) -> bool,
    ) -> Result<(), GraphError> {
        if resource.try_mark_pooled() {
            log::debug!("ResourcePool: '{}' returned after eviction", resource.name());
            self.list(resource.kind()).push_back(Arc::clone(resource));
        }

        if resource.is_bound() {
            if resource.try_activate() {
                let partner = resource
                    .alias_target()
                    .or_else(|| resource.last_aliased());
                if let (Some(before), Some(after)) =
                    (partner.and_then(|p| p.gpu()), resource.gpu())
                {
                    list.aliasing_barrier(before, after);
                }
            }
            return Ok(());
        }

        resource.try_activate();
        let binding = match self.alias_candidate(resource, may_alias) {
            Some(target) => self.place_alias(resource, &target, list)?,
            None => self.create(resource)?,
        };
        let gpu = binding.gpu;
        resource.bind(binding);

        if let Some(data) = resource.initial_data() {
            list.upload(gpu, Arc::clone(data));
        }
        Ok(())
    }

    /// First idle resource ahead of `resource` in the pool that it could be
    /// placed over, moved to the tail of that resource's alias chain.
    fn alias_candidate(
        &self,
        resource: &Arc<Resource>,
        may_alias: &dyn Fn(&Resource) -> bool,
    ) -> Option<Arc<Resource>> {
        let found = self
            .list(resource.kind())
            .find_map(|other| {
                if Arc::ptr_eq(other, resource) {
                    return Some(None);
                }
                let usable = !other.is_imported()
                    && !other.is_active()
                    && other.is_bound()
                    && other.desc().can_alias(resource.desc())
                    && may_alias(other);
                usable.then(|| Some(Arc::clone(other)))
            })
            .flatten()?;

        match found.last_aliased() {
            Some(tail) if !tail.is_active() && tail.is_bound() && may_alias(&tail) => Some(tail),
            Some(_) => None,
            None => Some(found),
        }
    }

    fn place_alias(
        &self,
        resource: &Arc<Resource>,
        target: &Arc<Resource>,
        list: &mut CommandList,
    ) -> Result<Binding, GraphError> {
        let Some((target_gpu, lease)) = target.placement() else {
            return self.create(resource);
        };
        let location = lease.location();
        let gpu = match (resource.desc(), target_gpu) {
            (ResourceDesc::Buffer(desc), GpuResource::Buffer(handle)) => {
                GpuResource::Buffer(self.device.create_buffer(desc, &location, Some(handle))?)
            }
            (ResourceDesc::Texture(desc), GpuResource::Texture(handle)) => {
                GpuResource::Texture(self.device.create_texture(desc, &location, Some(handle))?)
            }
            _ => return self.create(resource),
        };
        list.aliasing_barrier(target_gpu, gpu);
        Resource::link_alias(resource, target);
        log::debug!(
            "ResourcePool: '{}' aliases '{}' at {location:?}",
            resource.name(),
            target.name()
        );

        let descriptor = self.descriptors.allocate_cpu()?;
        self.device.create_descriptor(gpu, descriptor.index());
        Ok(Binding {
            gpu,
            lease: Some(lease),
            descriptor: Some(descriptor),
        })
    }

    fn create(&self, resource: &Resource) -> Result<Binding, GraphError> {
        let out_of_memory = |source| GraphError::OutOfMemory {
            name: resource.name().to_string(),
            source,
        };
        let (gpu, lease) = match resource.desc() {
            ResourceDesc::Buffer(desc) => {
                let lease = self.memory.allocate_buffer(desc).map_err(out_of_memory)?;
                let handle = self.device.create_buffer(desc, &lease.location(), None)?;
                (GpuResource::Buffer(handle), lease)
            }
            ResourceDesc::Texture(desc) => {
                let lease = self.memory.allocate_texture(desc).map_err(out_of_memory)?;
                let handle = self.device.create_texture(desc, &lease.location(), None)?;
                (GpuResource::Texture(handle), lease)
            }
        };
        log::trace!(
            "ResourcePool: created '{}' at {:?}",
            resource.name(),
            lease.location()
        );

        let descriptor = self.descriptors.allocate_cpu()?;
        self.device.create_descriptor(gpu, descriptor.index());
        Ok(Binding {
            gpu,
            lease: Some(lease),
            descriptor: Some(descriptor),
        })
    }

    /// Evict every resource not touched within the grace period before
    /// `frame`. Returns how many were evicted.
    pub fn tick(&self, frame: u64) -> usize {
        let grace = self.grace_frames;
        let keep = |r: &Arc<Resource>| frame.saturating_sub(r.last_used_frame()) <= grace;

        let mut evicted = self.buffers.retain(keep);
        evicted.extend(self.textures.retain(keep));

        for resource in &evicted {
            resource.release(&*self.device);
            log::debug!(
                "ResourcePool: evicted {} '{}' (last used in frame {})",
                resource.kind(),
                resource.name(),
                resource.last_used_frame()
            );
            self.events.emit(FrameEvent::ResourceEvicted {
                name: resource.name().to_string(),
                frame,
            });
        }
        evicted.len()
    }

    /// Release every resource.
    pub fn clear(&self) {
        let all: Vec<_> = self
            .buffers
            .retain(|_| false)
            .into_iter()
            .chain(self.textures.retain(|_| false))
            .collect();
        for resource in &all {
            resource.release(&*self.device);
        }
    }

    /// Call `f` on every pooled resource, buffers first.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<Resource>)) {
        self.buffers.for_each(&mut f);
        self.textures.for_each(&mut f);
    }

    /// Number of pooled buffers.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Number of pooled textures.
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Number of pooled resources of either kind.
    pub fn len(&self) -> usize {
        self.buffer_count() + self.texture_count()
    }

    /// Returns true when the pool holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn list(&self, kind: ResourceKind) -> &LockCoupledList<Arc<Resource>> {
        match kind {
            ResourceKind::Buffer => &self.buffers,
            ResourceKind::Texture => &self.textures,
        }
    }

    fn allocate_id(&self) -> ResourceId {
        ResourceId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("buffers", &self.buffer_count())
            .field("textures", &self.texture_count())
            .field("grace_frames", &self.grace_frames)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::{Barrier, DeviceEvent, DummyDevice};
    use crate::config::GraphConfig;
    use crate::types::{BufferUsage, QueueClass, TextureFormat, TextureUsage};

    struct Fixture {
        device: Arc<DummyDevice>,
        pool: ResourcePool,
    }

    fn fixture() -> Fixture {
        let config = GraphConfig::default()
            .with_buffer_heaps(1 << 20, 1 << 16)
            .with_texture_heap(1 << 22, 1 << 12, 1 << 20);
        let device = Arc::new(DummyDevice::new());
        let pool = ResourcePool::new(
            device.clone(),
            ResourceAllocator::new(&config),
            Arc::new(DescriptorHeaps::new(&config)),
            config.eviction_grace_frames,
            EventBus::new(),
        );
        Fixture { device, pool }
    }

    fn target(size: u32) -> TextureDescriptor {
        TextureDescriptor::new_2d(size, size, TextureFormat::Rgba8Unorm, TextureUsage::RENDER_ATTACHMENT)
    }

    fn list() -> CommandList {
        CommandList::new("test", QueueClass::Graphics)
    }

    #[test]
    fn test_concurrent_declares_share_one_entry() {
        let f = Arc::new(fixture());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let f = Arc::clone(&f);
                std::thread::spawn(move || {
                    (0..16)
                        .map(|i| f.pool.declare_texture(&format!("t{i}"), target(64), None, 0).id())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let ids: Vec<Vec<ResourceId>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.iter().all(|thread_ids| thread_ids == &ids[0]));
        assert_eq!(f.pool.texture_count(), 16);
    }

    #[test]
    fn test_declare_is_idempotent() {
        let f = fixture();
        let a = f.pool.declare_texture("gbuffer", target(64), None, 0);
        let b = f.pool.declare_texture("gbuffer", target(64), None, 0);
        assert_eq!(a, b);
        assert_eq!(f.pool.texture_count(), 1);
    }

    #[test]
    fn test_buffers_and_textures_have_separate_names() {
        let f = fixture();
        f.pool
            .declare_buffer("shared", BufferDescriptor::new(256, BufferUsage::STORAGE), None, 0);
        f.pool.declare_texture("shared", target(64), None, 0);
        assert_eq!(f.pool.len(), 2);
        assert!(f.pool.find_buffer("shared").is_some());
        assert!(f.pool.find_texture("missing").is_none());
    }

    #[test]
    fn test_first_allocation_creates_memory() {
        let f = fixture();
        let t = f.pool.declare_texture("color", target(64), None, 0);
        let mut cmd = list();
        f.pool.allocate(t.arc(), &mut cmd, &|_| true).unwrap();

        assert!(t.is_active());
        assert!(t.handle().is_some());
        assert!(t.memory().is_some());
        assert!(t.cpu_descriptor().is_some());
        assert_eq!(cmd.aliasing_barrier_count(), 0);
        assert_eq!(f.device.live_resource_count(), 1);
    }

    #[test]
    fn test_idle_compatible_resource_is_aliased() {
        let f = fixture();
        let a = f.pool.declare_texture("a", target(64), None, 0);
        let b = f.pool.declare_texture("b", target(64), None, 0);
        let mut cmd = list();

        f.pool.allocate(a.arc(), &mut cmd, &|_| true).unwrap();
        assert!(a.try_deactivate());
        f.pool.allocate(b.arc(), &mut cmd, &|_| true).unwrap();

        assert_eq!(a.memory(), b.memory());
        assert_eq!(b.alias_target().unwrap().id(), a.id());
        assert_eq!(a.aliased_by().unwrap().id(), b.id());
        assert_eq!(cmd.aliasing_barrier_count(), 1);
        assert!(f.device.events().iter().any(|e| matches!(
            e,
            DeviceEvent::CreateTexture { alias_of: Some(h), .. } if Some(*h) == a.handle()
        )));
    }

    #[test]
    fn test_active_or_incompatible_resources_are_not_aliased() {
        let f = fixture();
        let a = f.pool.declare_texture("a", target(64), None, 0);
        let b = f.pool.declare_texture("b", target(64), None, 0);
        let c = f.pool.declare_texture("c", target(128), None, 0);
        let mut cmd = list();

        f.pool.allocate(a.arc(), &mut cmd, &|_| true).unwrap();
        f.pool.allocate(b.arc(), &mut cmd, &|_| true).unwrap();
        assert_ne!(a.memory(), b.memory());

        assert!(a.try_deactivate());
        f.pool.allocate(c.arc(), &mut cmd, &|_| true).unwrap();
        assert_ne!(a.memory(), c.memory());
        assert_eq!(cmd.aliasing_barrier_count(), 0);
    }

    #[test]
    fn test_alias_filter_is_respected() {
        let f = fixture();
        let a = f.pool.declare_texture("a", target(64), None, 0);
        let b = f.pool.declare_texture("b", target(64), None, 0);
        let mut cmd = list();

        f.pool.allocate(a.arc(), &mut cmd, &|_| true).unwrap();
        a.try_deactivate();
        f.pool.allocate(b.arc(), &mut cmd, &|_| false).unwrap();
        assert_ne!(a.memory(), b.memory());
    }

    #[test]
    fn test_reactivation_barriers_against_partner() {
        let f = fixture();
        let a = f.pool.declare_texture("a", target(64), None, 0);
        let b = f.pool.declare_texture("b", target(64), None, 0);
        let mut first = list();
        f.pool.allocate(a.arc(), &mut first, &|_| true).unwrap();
        a.try_deactivate();
        f.pool.allocate(b.arc(), &mut first, &|_| true).unwrap();
        b.try_deactivate();

        let mut second = list();
        f.pool.allocate(a.arc(), &mut second, &|_| true).unwrap();
        second.flush_barriers();
        let barriers: Vec<_> = second.barriers().cloned().collect();
        assert_eq!(
            barriers,
            vec![Barrier::Aliasing {
                before: b.gpu().unwrap(),
                after: a.gpu().unwrap(),
            }]
        );
        // No new memory on reactivation.
        assert_eq!(f.device.live_resource_count(), 2);
    }

    #[test]
    fn test_initial_data_is_uploaded_once() {
        let f = fixture();
        let data: Arc<[u8]> = Arc::from(vec![7u8; 64]);
        let buffer = f.pool.declare_buffer(
            "vertices",
            BufferDescriptor::new(64, BufferUsage::VERTEX),
            Some(data),
            0,
        );
        let mut cmd = list();
        f.pool.allocate(buffer.arc(), &mut cmd, &|_| true).unwrap();
        buffer.try_deactivate();
        f.pool.allocate(buffer.arc(), &mut cmd, &|_| true).unwrap();

        let uploads = cmd
            .commands()
            .iter()
            .filter(|c| matches!(c, crate::backend::Command::Upload { .. }))
            .count();
        assert_eq!(uploads, 1);
    }

    #[test]
    fn test_eviction_after_grace_period() {
        let f = fixture();
        let t = f.pool.declare_texture("old", target(64), None, 10);
        f.pool.allocate(t.arc(), &mut list(), &|_| true).unwrap();

        assert_eq!(f.pool.tick(16), 0);
        assert!(f.pool.find_texture("old").is_some());

        assert_eq!(f.pool.tick(17), 1);
        assert!(f.pool.find_texture("old").is_none());
        assert!(t.handle().is_none());
        assert_eq!(f.device.live_resource_count(), 0);

        let fresh = f.pool.declare_texture("old", target(64), None, 17);
        assert_ne!(fresh.id(), t.id());
    }

    #[test]
    fn test_evicted_resource_returns_when_used() {
        let f = fixture();
        let t = f.pool.declare_texture("t", target(64), None, 0);
        f.pool.tick(10);
        assert!(!t.is_pooled());

        f.pool.allocate(t.arc(), &mut list(), &|_| true).unwrap();
        assert!(t.is_pooled());
        assert_eq!(f.pool.find_texture("t"), Some(t));
    }

    #[test]
    fn test_import_keeps_external_handle() {
        let f = fixture();
        let desc = target(64);
        let a = f
            .pool
            .import_texture("backbuffer", TextureHandle(900), desc.clone(), true, 0)
            .unwrap();
        let b = f
            .pool
            .import_texture("backbuffer", TextureHandle(901), desc, true, 0)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.handle(), Some(TextureHandle(900)));
        assert!(a.is_imported());
        assert!(a.cpu_descriptor().is_some());

        f.pool.tick(100);
        assert_eq!(a.handle(), Some(TextureHandle(900)));
        assert_eq!(f.device.live_resource_count(), 0);
    }

    #[test]
    fn test_out_of_memory_is_reported() {
        let f = fixture();
        let huge = TextureDescriptor::new_2d(4096, 4096, TextureFormat::Rgba32Float, TextureUsage::empty());
        let t = f.pool.declare_texture("huge", huge, None, 0);
        let err = f.pool.allocate(t.arc(), &mut list(), &|_| true).unwrap_err();
        assert!(matches!(err, GraphError::OutOfMemory { ref name, .. } if name == "huge"));
    }

    #[test]
    fn test_eviction_emits_event() {
        let f = fixture();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        f.pool.events.subscribe(move |e| sink.lock().push(e.clone()));

        f.pool
            .declare_buffer("tmp", BufferDescriptor::new(256, BufferUsage::STORAGE), None, 0);
        f.pool.tick(7);
        assert_eq!(
            *seen.lock(),
            vec![FrameEvent::ResourceEvicted {
                name: "tmp".into(),
                frame: 7
            }]
        );
    }
}
