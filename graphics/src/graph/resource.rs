//! Frame graph resources and the typed references passes hold.

use std::collections::HashSet;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::PassId;
use crate::backend::{BufferHandle, GpuDevice, GpuResource, TextureHandle};
use crate::memory::{CpuDescriptor, MemoryLease, MemoryLocation};
use crate::types::{BufferDescriptor, ResourceKind, ResourceState, TextureDescriptor};

/// Identity of a pool resource.
///
/// Ids come from a per-pool counter and are never reused, so an id alone
/// tells a re-declared resource apart from the one it replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id value.
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Descriptor of either resource kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceDesc {
    Buffer(BufferDescriptor),
    Texture(TextureDescriptor),
}

impl ResourceDesc {
    /// Buffer or texture.
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Buffer(_) => ResourceKind::Buffer,
            Self::Texture(_) => ResourceKind::Texture,
        }
    }

    /// State passes declaring the resource need it in.
    pub fn declared_state(&self) -> ResourceState {
        match self {
            Self::Buffer(desc) => desc.state,
            Self::Texture(desc) => desc.state,
        }
    }

    /// Same kind and alias-compatible descriptors.
    pub fn can_alias(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Buffer(a), Self::Buffer(b)) => a.can_alias(b),
            (Self::Texture(a), Self::Texture(b)) => a.can_alias(b),
            _ => false,
        }
    }
}

/// GPU objects bound to a materialized resource.
pub(crate) struct Binding {
    pub gpu: GpuResource,
    /// `None` for imported resources, whose memory is owned elsewhere.
    pub lease: Option<MemoryLease>,
    pub descriptor: Option<CpuDescriptor>,
}

#[derive(Default)]
struct AliasLinks {
    /// The resource whose memory this one was placed over.
    target: Weak<Resource>,
    /// The resource later placed over this one's memory.
    aliased_by: Weak<Resource>,
}

/// A buffer or texture owned by the resource pool.
///
/// Resources are born inactive and without memory. The first pass that
/// runs with one materializes it, either fresh or placed over the memory
/// of an idle alias-compatible resource. The `active` flag is the only
/// synchronization between passes racing to use the same memory; it is
/// flipped with compare-and-swap.
pub struct Resource {
    id: ResourceId,
    name: String,
    desc: ResourceDesc,
    imported: bool,
    initial_data: Option<Arc<[u8]>>,
    active: AtomicBool,
    pooled: AtomicBool,
    last_used_frame: AtomicU64,
    users: Mutex<Vec<PassId>>,
    state: Mutex<ResourceState>,
    binding: Mutex<Option<Binding>>,
    alias: Mutex<AliasLinks>,
}

impl Resource {
    pub(crate) fn declared(
        id: ResourceId,
        name: &str,
        desc: ResourceDesc,
        initial_data: Option<Arc<[u8]>>,
        frame: u64,
    ) -> Self {
        Self::build(id, name, desc, false, initial_data, frame, None, ResourceState::Common)
    }

    pub(crate) fn imported(
        id: ResourceId,
        name: &str,
        desc: ResourceDesc,
        binding: Binding,
        frame: u64,
    ) -> Self {
        let state = desc.declared_state();
        Self::build(id, name, desc, true, None, frame, Some(binding), state)
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        id: ResourceId,
        name: &str,
        desc: ResourceDesc,
        imported: bool,
        initial_data: Option<Arc<[u8]>>,
        frame: u64,
        binding: Option<Binding>,
        state: ResourceState,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            desc,
            imported,
            initial_data,
            active: AtomicBool::new(false),
            pooled: AtomicBool::new(true),
            last_used_frame: AtomicU64::new(frame),
            users: Mutex::new(Vec::new()),
            state: Mutex::new(state),
            binding: Mutex::new(binding),
            alias: Mutex::new(AliasLinks::default()),
        }
    }

    /// Pool-unique id.
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Name the resource was declared or imported under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Buffer or texture.
    pub fn kind(&self) -> ResourceKind {
        self.desc.kind()
    }

    /// Descriptor the resource was declared or imported with.
    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    /// Returns true for resources wrapping an externally owned GPU object.
    pub fn is_imported(&self) -> bool {
        self.imported
    }

    /// Returns true while a pass of the current frame holds the resource's memory.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns true while the resource is listed in its pool.
    pub fn is_pooled(&self) -> bool {
        self.pooled.load(Ordering::Acquire)
    }

    /// Latest frame a pass touched the resource in.
    pub fn last_used_frame(&self) -> u64 {
        self.last_used_frame.load(Ordering::Acquire)
    }

    /// The last pass, in declaration order, that uses this resource.
    pub fn last_pass(&self) -> Option<PassId> {
        self.users.lock().last().copied()
    }

    /// Every pass using this resource, in declaration order.
    pub fn users(&self) -> Vec<PassId> {
        self.users.lock().clone()
    }

    /// Returns true when every pass using the resource is in `passes`.
    pub(crate) fn used_only_by(&self, passes: &HashSet<PassId>) -> bool {
        self.users.lock().iter().all(|pass| passes.contains(pass))
    }

    /// State the resource was last transitioned to.
    pub fn state(&self) -> ResourceState {
        *self.state.lock()
    }

    /// Bound device object, once materialized.
    pub fn gpu(&self) -> Option<GpuResource> {
        self.binding.lock().as_ref().map(|b| b.gpu)
    }

    /// Memory the resource is placed in. `None` for imported resources.
    pub fn memory(&self) -> Option<MemoryLocation> {
        self.binding
            .lock()
            .as_ref()
            .and_then(|b| b.lease.as_ref().map(MemoryLease::location))
    }

    /// CPU descriptor slot holding the resource's view.
    pub fn cpu_descriptor(&self) -> Option<u64> {
        self.binding
            .lock()
            .as_ref()
            .and_then(|b| b.descriptor.as_ref().map(CpuDescriptor::index))
    }

    /// The resource this one shares memory with and was placed after.
    pub fn alias_target(&self) -> Option<Arc<Resource>> {
        self.alias.lock().target.upgrade()
    }

    /// The resource later placed over this one's memory.
    pub fn aliased_by(&self) -> Option<Arc<Resource>> {
        self.alias.lock().aliased_by.upgrade()
    }

    /// Most recent resource placed over this memory, following
    /// `aliased_by` to the end of the chain.
    pub fn last_aliased(&self) -> Option<Arc<Resource>> {
        let mut last = self.aliased_by()?;
        while let Some(next) = last.aliased_by() {
            last = next;
        }
        Some(last)
    }

    pub(crate) fn initial_data(&self) -> Option<&Arc<[u8]>> {
        self.initial_data.as_ref()
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.binding.lock().is_some()
    }

    /// Bound object and a share of its memory, for placing an alias.
    pub(crate) fn placement(&self) -> Option<(GpuResource, MemoryLease)> {
        let binding = self.binding.lock();
        let binding = binding.as_ref()?;
        Some((binding.gpu, binding.lease.clone()?))
    }

    pub(crate) fn bind(&self, binding: Binding) {
        *self.binding.lock() = Some(binding);
    }

    /// Flip inactive to active. Returns false if already active.
    pub(crate) fn try_activate(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Flip active to inactive. Returns false if already inactive.
    pub(crate) fn try_deactivate(&self) -> bool {
        self.active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark the resource listed in its pool. Returns false if it already was.
    pub(crate) fn try_mark_pooled(&self) -> bool {
        !self.pooled.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn touch(&self, frame: u64) {
        self.last_used_frame.fetch_max(frame, Ordering::AcqRel);
    }

    pub(crate) fn set_users(&self, users: Vec<PassId>) {
        *self.users.lock() = users;
    }

    /// Record `after` as the current state and return the previous one.
    pub(crate) fn swap_state(&self, after: ResourceState) -> ResourceState {
        std::mem::replace(&mut *self.state.lock(), after)
    }

    /// Place `resource` after `target` in the alias chain.
    pub(crate) fn link_alias(resource: &Arc<Resource>, target: &Arc<Resource>) {
        resource.alias.lock().target = Arc::downgrade(target);
        target.alias.lock().aliased_by = Arc::downgrade(resource);
    }

    /// Drop pool-owned GPU objects after eviction.
    ///
    /// Imported resources keep their binding since the caller owns it.
    pub(crate) fn release(&self, device: &dyn GpuDevice) {
        self.pooled.store(false, Ordering::Release);
        self.active.store(false, Ordering::Release);
        if self.imported {
            return;
        }
        if let Some(binding) = self.binding.lock().take() {
            match binding.gpu {
                GpuResource::Buffer(handle) => device.destroy_buffer(handle),
                GpuResource::Texture(handle) => device.destroy_texture(handle),
            }
        }
        *self.state.lock() = ResourceState::Common;
        self.unlink_alias();
    }

    /// Splice this resource out of its alias chain.
    fn unlink_alias(&self) {
        let (target, next) = {
            let mut links = self.alias.lock();
            (
                std::mem::take(&mut links.target).upgrade(),
                std::mem::take(&mut links.aliased_by).upgrade(),
            )
        };
        if let Some(target) = &target {
            target.alias.lock().aliased_by = next.as_ref().map_or_else(Weak::new, Arc::downgrade);
        }
        if let Some(next) = &next {
            next.alias.lock().target = target.as_ref().map_or_else(Weak::new, Arc::downgrade);
        }
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        self.unlink_alias();
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("active", &self.is_active())
            .field("last_used_frame", &self.last_used_frame())
            .finish_non_exhaustive()
    }
}

macro_rules! typed_ref {
    ($(#[$meta:meta])* $name:ident, $desc:ident, $variant:ident, $handle:ident) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name(pub(crate) Arc<Resource>);

        impl $name {
            /// Descriptor the resource was declared or imported with.
            pub fn descriptor(&self) -> &$desc {
                match self.0.desc() {
                    ResourceDesc::$variant(desc) => desc,
                    _ => unreachable!(concat!(stringify!($name), " wraps a ", stringify!($variant))),
                }
            }

            /// Bound device handle, once materialized.
            pub fn handle(&self) -> Option<$handle> {
                match self.0.gpu()? {
                    GpuResource::$variant(handle) => Some(handle),
                    _ => None,
                }
            }

            pub(crate) fn arc(&self) -> &Arc<Resource> {
                &self.0
            }
        }

        impl Deref for $name {
            type Target = Resource;

            fn deref(&self) -> &Resource {
                &self.0
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                Arc::ptr_eq(&self.0, &other.0)
            }
        }

        impl Eq for $name {}

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_tuple(stringify!($name))
                    .field(&self.0.name())
                    .field(&self.0.id())
                    .finish()
            }
        }
    };
}

typed_ref!(
    /// A pool buffer, as handed to pass setup closures.
    BufferRef,
    BufferDescriptor,
    Buffer,
    BufferHandle
);

typed_ref!(
    /// A pool texture, as handed to pass setup closures.
    TextureRef,
    TextureDescriptor,
    Texture,
    TextureHandle
);

/// How a resource is bound for one pass execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundResource {
    pub gpu: GpuResource,
    /// Shader-visible descriptor slot copied for this execution.
    pub gpu_descriptor: Option<u64>,
    pub state: ResourceState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BufferUsage;

    fn buffer(id: u64) -> Arc<Resource> {
        Arc::new(Resource::declared(
            ResourceId::new(id),
            &format!("b{id}"),
            ResourceDesc::Buffer(BufferDescriptor::new(256, BufferUsage::STORAGE)),
            None,
            0,
        ))
    }

    #[test]
    fn test_activation_flips_once() {
        let r = buffer(1);
        assert!(!r.is_active());
        assert!(r.try_activate());
        assert!(!r.try_activate());
        assert!(r.try_deactivate());
        assert!(!r.try_deactivate());
    }

    #[test]
    fn test_alias_chain_tail() {
        let (a, b, c) = (buffer(1), buffer(2), buffer(3));
        Resource::link_alias(&b, &a);
        Resource::link_alias(&c, &b);

        assert_eq!(a.last_aliased().unwrap().id(), c.id());
        assert_eq!(c.alias_target().unwrap().id(), b.id());
        assert!(c.last_aliased().is_none());
    }

    #[test]
    fn test_drop_relinks_chain() {
        let (a, b, c) = (buffer(1), buffer(2), buffer(3));
        Resource::link_alias(&b, &a);
        Resource::link_alias(&c, &b);

        drop(b);
        assert_eq!(a.aliased_by().unwrap().id(), c.id());
        assert_eq!(c.alias_target().unwrap().id(), a.id());
    }

    #[test]
    fn test_touch_keeps_latest_frame() {
        let r = buffer(1);
        r.touch(7);
        r.touch(5);
        assert_eq!(r.last_used_frame(), 7);
    }

    #[test]
    fn test_refs_compare_by_identity() {
        let r = buffer(1);
        let a = BufferRef(Arc::clone(&r));
        let b = BufferRef(r);
        let c = BufferRef(buffer(1));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.descriptor().size, 256);
    }
}
