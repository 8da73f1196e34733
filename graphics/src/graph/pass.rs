//! Passes: declared resources plus a setup/execute closure pair.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use super::builder::{PassBuilder, PassResources};
use super::frame_graph::GraphShared;
use super::resource::{BoundResource, BufferRef, Resource, ResourceId, TextureRef};
use super::slot::{FrameSlot, Submission};
use super::PassId;
use crate::backend::{CommandList, GpuResource, TextureHandle};
use crate::error::fatal;
use crate::memory::MemoryLocation;
use crate::types::{QueueClass, ResourceState, Viewport};

/// Name, queue and render area of a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassDesc {
    pub name: String,
    pub queue: QueueClass,
    /// Render area width, used for the viewport of graphics passes.
    pub width: u32,
    /// Render area height.
    pub height: u32,
}

impl PassDesc {
    /// A pass named `name` submitted to `queue`.
    pub fn new(name: impl Into<String>, queue: QueueClass) -> Self {
        Self {
            name: name.into(),
            queue,
            width: 0,
            height: 0,
        }
    }

    /// A graphics pass drawing into a `width` x `height` area.
    pub fn graphics(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self::new(name, QueueClass::Graphics).with_extent(width, height)
    }

    /// A compute queue pass.
    pub fn compute(name: impl Into<String>) -> Self {
        Self::new(name, QueueClass::Compute)
    }

    /// A copy queue pass.
    pub fn copy(name: impl Into<String>) -> Self {
        Self::new(name, QueueClass::Copy)
    }

    /// Set the viewport extent.
    pub fn with_extent(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

/// Type-erased setup/execute pair of a pass.
pub(crate) trait PassBody: Send + Sync {
    fn setup(&mut self, builder: &mut PassBuilder<'_>);

    fn execute(&self, ctx: &PassContext<'_>, list: &mut CommandList);
}

/// A pass whose setup fills a `T` that its execute closure then reads.
pub(crate) struct DataPass<T, S, E> {
    data: T,
    setup: Mutex<Option<S>>,
    execute: E,
}

impl<T: Default, S, E> DataPass<T, S, E> {
    pub fn new(setup: S, execute: E) -> Self {
        Self {
            data: T::default(),
            setup: Mutex::new(Some(setup)),
            execute,
        }
    }
}

impl<T, S, E> PassBody for DataPass<T, S, E>
where
    T: Send + Sync,
    S: FnOnce(&mut T, &mut PassBuilder<'_>) + Send,
    E: Fn(&T, &PassContext<'_>, &mut CommandList) + Send + Sync,
{
    fn setup(&mut self, builder: &mut PassBuilder<'_>) {
        if let Some(setup) = self.setup.get_mut().take() {
            setup(&mut self.data, builder);
        }
    }

    fn execute(&self, ctx: &PassContext<'_>, list: &mut CommandList) {
        (self.execute)(&self.data, ctx, list);
    }
}

/// Cross-queue synchronization of one pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct QueueSync {
    /// Signal a marker on this pass's queue after its batch.
    pub signal: bool,
    /// Producers whose markers this pass's queue waits on first.
    pub waits: Vec<PassId>,
}

/// A registered pass and everything compile derived for it.
pub(crate) struct PassEntry {
    pub id: PassId,
    pub desc: PassDesc,
    pub resources: PassResources,
    /// Resources whose last use, in declaration order, is this pass.
    pub last_uses: Vec<Arc<Resource>>,
    pub sync: QueueSync,
    /// Passes that always finish before this one starts.
    pub ancestors: HashSet<PassId>,
    pub is_set_up: bool,
    /// One command list per frame slot.
    pub lists: Vec<Mutex<CommandList>>,
    pub body: Box<dyn PassBody>,
}

impl PassEntry {
    pub fn new(id: PassId, desc: PassDesc, slots: usize, body: Box<dyn PassBody>) -> Self {
        let lists = (0..slots)
            .map(|_| Mutex::new(CommandList::new(desc.name.clone(), desc.queue)))
            .collect();
        Self {
            id,
            desc,
            resources: PassResources::default(),
            last_uses: Vec::new(),
            sync: QueueSync::default(),
            ancestors: HashSet::new(),
            is_set_up: false,
            lists,
            body,
        }
    }

    /// A resource can be placed over `other`'s memory only once every use
    /// of `other` is ordered before this pass.
    fn may_alias_over(&self, other: &Resource) -> bool {
        other.used_only_by(&self.ancestors)
    }

    /// Record this pass into frame slot `slot`.
    pub fn record(&self, shared: &GraphShared, slot: &FrameSlot) {
        let frame = slot.frame_index();
        let mut list = self.lists[slot.index()].lock();
        list.reset();

        let mut bound = HashMap::new();
        {
            // Allocation and barrier recording follow submission order.
            let mut submissions = slot.lock_submissions();
            submissions.push(Submission::Pass(self.id));
            for resource in self.resources.all() {
                shared
                    .pool
                    .allocate(resource, &mut list, &|other| self.may_alias_over(other))
                    .unwrap_or_else(|e| fatal(e));
                resource.touch(frame);

                let Some(gpu) = resource.gpu() else {
                    unreachable!("'{}' has no GPU object after allocation", resource.name());
                };
                let state = self.resources.state_of(resource.id());
                let before = resource.swap_state(state);
                list.transition(gpu, before, state);

                let gpu_descriptor = resource.cpu_descriptor().map(|cpu| {
                    let gpu_slot = shared
                        .descriptors
                        .allocate_gpu()
                        .unwrap_or_else(|e| fatal(e));
                    shared.device.copy_descriptor(gpu_slot, cpu);
                    gpu_slot
                });
                bound.insert(
                    resource.id(),
                    BoundResource {
                        gpu,
                        gpu_descriptor,
                        state,
                    },
                );
            }
        }
        list.flush_barriers();

        let graphics = self.desc.queue == QueueClass::Graphics;
        if graphics {
            list.set_viewport(Viewport::from_dimensions(self.desc.width, self.desc.height));
            let (color_targets, depth_target) = self.render_targets(&bound);
            list.begin_render_pass(color_targets, depth_target);
        }

        let ctx = PassContext {
            pass: self,
            slot,
            bound,
        };
        self.body.execute(&ctx, &mut list);

        if graphics {
            list.end_render_pass();
        }
        list.close();

        for resource in &self.last_uses {
            resource.try_deactivate();
        }
    }

    fn render_targets(
        &self,
        bound: &HashMap<ResourceId, BoundResource>,
    ) -> (Vec<TextureHandle>, Option<TextureHandle>) {
        let mut colors = Vec::new();
        let mut depth = None;
        for texture in &self.resources.write_textures {
            let Some(binding) = bound.get(&texture.id()) else {
                continue;
            };
            let GpuResource::Texture(handle) = binding.gpu else {
                continue;
            };
            match binding.state {
                ResourceState::RenderTarget => colors.push(handle),
                ResourceState::DepthWrite => depth = Some(handle),
                _ => {}
            }
        }
        (colors, depth)
    }
}

/// What a pass's execute closure sees of the frame it records into.
pub struct PassContext<'a> {
    pass: &'a PassEntry,
    slot: &'a FrameSlot,
    bound: HashMap<ResourceId, BoundResource>,
}

impl PassContext<'_> {
    /// Name of the running pass.
    pub fn pass_name(&self) -> &str {
        &self.pass.desc.name
    }

    /// Index of the render thread recording this frame.
    pub fn thread_index(&self) -> usize {
        self.slot.index()
    }

    /// Frame being recorded.
    pub fn frame_index(&self) -> u64 {
        self.slot.frame_index()
    }

    /// The frame-in-flight slot being recorded.
    pub fn frame_slot(&self) -> &FrameSlot {
        self.slot
    }

    /// How `buffer` is bound for this execution.
    ///
    /// # Panics
    ///
    /// Panics if the pass did not declare `buffer`.
    pub fn buffer(&self, buffer: &BufferRef) -> BoundResource {
        self.bound_resource(buffer.id(), buffer.name())
    }

    /// How `texture` is bound for this execution.
    ///
    /// # Panics
    ///
    /// Panics if the pass did not declare `texture`.
    pub fn texture(&self, texture: &TextureRef) -> BoundResource {
        self.bound_resource(texture.id(), texture.name())
    }

    /// Where this frame's constants of type `T` live.
    pub fn constants<T: 'static>(&self) -> Option<MemoryLocation> {
        self.slot.constants::<T>()
    }

    /// Queue an extra list for submission after the lists recorded so far.
    pub fn submit_command_list(&self, mut list: CommandList) {
        if !list.is_closed() {
            list.close();
        }
        self.slot.push_submission(Submission::Extra(list));
    }

    fn bound_resource(&self, id: ResourceId, name: &str) -> BoundResource {
        match self.bound.get(&id) {
            Some(bound) => *bound,
            None => panic!(
                "pass '{}' did not declare resource '{name}'",
                self.pass.desc.name
            ),
        }
    }
}

impl std::fmt::Debug for PassContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassContext")
            .field("pass", &self.pass.desc.name)
            .field("slot", &self.slot.index())
            .field("bound", &self.bound.len())
            .finish()
    }
}
