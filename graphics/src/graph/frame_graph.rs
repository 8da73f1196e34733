//! The frame graph orchestrator.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use framewright_core::task::{TaskExecutor, TaskGraph, TaskId};
use framewright_core::ThreadCtrl;
use parking_lot::MutexGuard;

use super::builder::PassBuilder;
use super::pass::{DataPass, PassContext, PassDesc, PassEntry};
use super::pool::ResourcePool;
use super::slot::{FrameSlot, Submission};
use super::{PassId, ResourceId};
use crate::backend::{CommandList, Fence, GpuDevice};
use crate::config::GraphConfig;
use crate::error::{fatal, GraphError};
use crate::events::{EventBus, FrameEvent};
use crate::memory::{DescriptorHeaps, ResourceAllocator};
use crate::types::QueueClass;

/// Number of hand-offs per frame: record, submit, wait for the GPU.
const PHASES: usize = 3;

/// State shared between the orchestrator and the compiled pass tasks.
pub(crate) struct GraphShared {
    pub device: Arc<dyn GpuDevice>,
    pub pool: ResourcePool,
    pub descriptors: Arc<DescriptorHeaps>,
    pub memory: ResourceAllocator,
    pub slots: Vec<FrameSlot>,
    pub frame_counter: AtomicU64,
    pub events: EventBus,
    /// Signalled on the graphics queue after each present.
    pub frame_fence: Fence,
    /// Signalled by producing passes of cross-queue edges.
    pub queue_fence: Fence,
}

struct CompiledGraph {
    /// One replayable task graph per frame slot.
    task_graphs: Vec<TaskGraph>,
    edges: Vec<(PassId, PassId)>,
}

/// Registers passes, compiles their dependencies into a task graph and
/// pipelines recording, submission and GPU waits across frame slots.
///
/// # Lifecycle
///
/// 1. [`add_pass`](Self::add_pass) for every pass, in intended data-flow order
/// 2. [`setup`](Self::setup) runs the setup closures, which declare resources
/// 3. [`compile`](Self::compile) derives the dependency edges
/// 4. [`execute`](Self::execute) once per frame per thread index
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use framewright_graphics::{
///     DummyDevice, EventBus, FrameGraph, GraphConfig, PassDesc, ResourceState, TextureDescriptor,
///     TextureFormat, TextureRef, TextureUsage,
/// };
///
/// let device = Arc::new(DummyDevice::new());
/// let config = GraphConfig::default().with_worker_threads(1);
/// let mut graph = FrameGraph::new(device, config, EventBus::new()).unwrap();
///
/// graph
///     .add_pass::<Option<TextureRef>, _, _>(
///         PassDesc::graphics("clear", 64, 64),
///         |target, builder| {
///             let desc = TextureDescriptor::new_2d(
///                 64, 64, TextureFormat::Rgba8Unorm, TextureUsage::RENDER_ATTACHMENT,
///             )
///             .with_state(ResourceState::RenderTarget);
///             *target = Some(builder.declare_write_texture("color", desc));
///         },
///         |_, _, list| list.draw(3, 1),
///     )
///     .unwrap();
///
/// graph.compile().unwrap();
/// for thread_index in 0..3 {
///     graph.execute(thread_index).unwrap();
/// }
/// assert_eq!(graph.frame_index(), 3);
/// ```
pub struct FrameGraph {
    shared: Arc<GraphShared>,
    passes: Arc<Vec<PassEntry>>,
    executor: TaskExecutor,
    ctrls: Vec<ThreadCtrl>,
    compiled: Option<CompiledGraph>,
    started: AtomicBool,
    config: GraphConfig,
}

impl FrameGraph {
    /// Create an empty frame graph on `device`.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        config: GraphConfig,
        events: EventBus,
    ) -> Result<Self, GraphError> {
        config.validate()?;
        let executor = TaskExecutor::new(config.worker_threads)
            .map_err(|e| GraphError::ThreadSpawn(e.to_string()))?;

        let descriptors = Arc::new(DescriptorHeaps::new(&config));
        let memory = ResourceAllocator::new(&config);
        let slots = (0..config.frames_in_flight)
            .map(|index| Ok(FrameSlot::new(index, descriptors.allocate_static_gpu()?)))
            .collect::<Result<Vec<_>, GraphError>>()?;
        let pool = ResourcePool::new(
            Arc::clone(&device),
            memory.clone(),
            Arc::clone(&descriptors),
            config.eviction_grace_frames,
            events.clone(),
        );

        log::info!(
            "FrameGraph: created on {} device with {} frames in flight and {} workers",
            device.name(),
            config.frames_in_flight,
            executor.thread_count()
        );

        let shared = GraphShared {
            frame_fence: Fence::new(Arc::clone(&device)),
            queue_fence: Fence::new(Arc::clone(&device)),
            device,
            pool,
            descriptors,
            memory,
            slots,
            frame_counter: AtomicU64::new(0),
            events,
        };
        Ok(Self {
            shared: Arc::new(shared),
            passes: Arc::new(Vec::new()),
            executor,
            ctrls: (0..config.frames_in_flight)
                .map(|_| ThreadCtrl::new(PHASES, false))
                .collect(),
            compiled: None,
            started: AtomicBool::new(false),
            config,
        })
    }

    /// Register a pass.
    ///
    /// `setup` runs once, in [`setup`](Self::setup), and fills the pass data
    /// `T` with the resources it declares. `execute` runs every frame with
    /// that data and the pass's command list.
    pub fn add_pass<T, S, E>(
        &mut self,
        desc: PassDesc,
        setup: S,
        execute: E,
    ) -> Result<PassId, GraphError>
    where
        T: Default + Send + Sync + 'static,
        S: FnOnce(&mut T, &mut PassBuilder<'_>) + Send + 'static,
        E: Fn(&T, &PassContext<'_>, &mut CommandList) + Send + Sync + 'static,
    {
        let slots = self.config.frames_in_flight;
        let passes = Arc::get_mut(&mut self.passes).ok_or(GraphError::AlreadyCompiled)?;
        if passes.iter().any(|p| p.desc.name == desc.name) {
            log::warn!("FrameGraph: more than one pass named '{}'", desc.name);
        }
        let id = PassId::new(passes.len());
        let body = Box::new(DataPass::<T, S, E>::new(setup, execute));
        passes.push(PassEntry::new(id, desc, slots, body));
        Ok(id)
    }

    /// Run the setup closure of every pass not yet set up, and arm the
    /// first thread index.
    pub fn setup(&mut self) -> Result<(), GraphError> {
        let frame = self.frame_index();
        let passes = Arc::get_mut(&mut self.passes).ok_or(GraphError::AlreadyCompiled)?;
        let mut count = 0;
        for pass in passes.iter_mut().filter(|p| !p.is_set_up) {
            let mut builder = PassBuilder::new(&self.shared.pool, &mut pass.resources, frame);
            pass.body.setup(&mut builder);
            pass.is_set_up = true;
            count += 1;
        }
        log::debug!("FrameGraph: set up {count} passes");

        if !self.started.swap(true, Ordering::AcqRel) {
            self.ctrls[0].wake_all();
        }
        Ok(())
    }

    /// Derive dependency edges and build the per-slot task graphs.
    ///
    /// Pass `j` depends on an earlier pass `i` when `j` reads what `i`
    /// writes, or writes what `i` reads or writes. An edge between passes on
    /// different hardware queues also makes `i` signal a marker that `j`'s
    /// queue waits on. Runs [`setup`](Self::setup) first if needed.
    pub fn compile(&mut self) -> Result<(), GraphError> {
        if self.compiled.is_some() {
            return Err(GraphError::AlreadyCompiled);
        }
        self.setup()?;

        let passes = Arc::get_mut(&mut self.passes).ok_or(GraphError::AlreadyCompiled)?;
        let edges = dependency_edges(passes);

        let mut ancestors: Vec<HashSet<PassId>> = vec![HashSet::new(); passes.len()];
        let mut cross_queue = 0;
        for &(i, j) in &edges {
            let inherited = ancestors[i].clone();
            ancestors[j].insert(PassId::new(i));
            ancestors[j].extend(inherited);

            let producer = passes[i].desc.queue.submit_queue();
            let consumer = passes[j].desc.queue.submit_queue();
            if producer != consumer {
                passes[i].sync.signal = true;
                passes[j].sync.waits.push(PassId::new(i));
                cross_queue += 1;
            }
        }
        for (pass, ancestors) in passes.iter_mut().zip(ancestors) {
            pass.ancestors = ancestors;
        }
        record_resource_users(passes, &self.shared.pool);

        let task_graphs = (0..self.config.frames_in_flight)
            .map(|slot| self.build_task_graph(slot, &edges))
            .collect();

        log::info!(
            "FrameGraph: compiled {} passes with {} edges ({} cross-queue)",
            self.passes.len(),
            edges.len(),
            cross_queue
        );
        self.compiled = Some(CompiledGraph {
            task_graphs,
            edges: edges
                .into_iter()
                .map(|(i, j)| (PassId::new(i), PassId::new(j)))
                .collect(),
        });
        Ok(())
    }

    fn build_task_graph(&self, slot: usize, edges: &[(usize, usize)]) -> TaskGraph {
        let mut graph = TaskGraph::new();
        let ids: Vec<TaskId> = self
            .passes
            .iter()
            .map(|pass| {
                let index = pass.id.index();
                let passes = Arc::clone(&self.passes);
                let shared = Arc::clone(&self.shared);
                graph.emplace(pass.desc.name.clone(), move || {
                    passes[index].record(&shared, &shared.slots[slot]);
                })
            })
            .collect();
        for &(i, j) in edges {
            graph.precede(ids[i], ids[j]);
        }
        graph
    }

    /// Run one frame on `thread_index`: record, submit, then wait for the
    /// GPU to finish the slot, handing over to the next thread index after
    /// each phase.
    ///
    /// Thread indices must be driven round-robin, either by one thread
    /// calling `0, 1, 2, 0, ...` or by one thread per index.
    pub fn execute(&self, thread_index: usize) -> Result<(), GraphError> {
        let compiled = self.compiled.as_ref().ok_or(GraphError::NotCompiled)?;
        let frames = self.ctrls.len();
        if thread_index >= frames {
            return Err(GraphError::InvalidThreadIndex {
                index: thread_index,
                frames,
            });
        }
        let own = &self.ctrls[thread_index];
        let next = &self.ctrls[(thread_index + 1) % frames];
        let wait = || if own.wait() { Ok(()) } else { Err(GraphError::Halted) };

        wait()?;
        self.render(thread_index, compiled);
        wait()?;
        next.wake();
        self.submit(thread_index);
        wait()?;
        next.wake();
        self.wait_for_gpu(thread_index);
        next.wake();
        Ok(())
    }

    /// Release every thread parked in [`execute`](Self::execute). From now
    /// on `execute` returns [`GraphError::Halted`] at its next hand-off.
    pub fn halt(&self) {
        if self.is_halted() {
            return;
        }
        for ctrl in &self.ctrls {
            ctrl.close();
        }
        log::warn!("FrameGraph: halted at frame {}", self.frame_index());
    }

    /// Returns true once [`halt`](Self::halt) was called.
    pub fn is_halted(&self) -> bool {
        self.ctrls.iter().any(ThreadCtrl::is_closed)
    }

    /// Stage constants of type `T` for the next frame recorded on
    /// `thread_index`. Passes find them through [`PassContext::constants`].
    pub fn update_frame_constants<T: bytemuck::Pod>(
        &self,
        thread_index: usize,
        value: &T,
    ) -> Result<(), GraphError> {
        let slot = self.slot(thread_index)?;
        slot.stage_constants(value);
        Ok(())
    }

    fn render(&self, index: usize, compiled: &CompiledGraph) {
        let shared = &self.shared;
        let slot = &shared.slots[index];
        let frame = shared.frame_counter.fetch_add(1, Ordering::AcqRel) + 1;
        slot.begin_frame(frame);

        let evicted = shared.pool.tick(frame);
        slot.bind_constants(&shared.memory, &*shared.device)
            .unwrap_or_else(|e| fatal(e));

        self.executor.run(&compiled.task_graphs[index]);

        shared.descriptors.finish_frame();
        shared.memory.finish_frame();
        log::debug!("FrameGraph: recorded frame {frame} in slot {index} ({evicted} evicted)");
        shared
            .events
            .emit(FrameEvent::FrameRecorded { frame, slot: index });
    }

    fn submit(&self, index: usize) {
        let shared = &self.shared;
        let slot = &shared.slots[index];
        let recorded: Vec<Recorded<'_>> = slot
            .take_submissions()
            .into_iter()
            .map(|submission| match submission {
                Submission::Pass(id) => Recorded::Pass(id, self.passes[id.index()].lists[index].lock()),
                Submission::Extra(list) => Recorded::Extra(list),
            })
            .collect();

        let mut markers: HashMap<PassId, u64> = HashMap::new();
        let mut start = 0;
        while start < recorded.len() {
            let queue = recorded[start].queue();
            let len = recorded[start..]
                .iter()
                .take_while(|r| r.queue() == queue)
                .count();
            let batch = &recorded[start..start + len];

            for pass in batch.iter().filter_map(Recorded::pass) {
                for producer in &self.passes[pass.index()].sync.waits {
                    match markers.get(producer) {
                        Some(&value) => shared.queue_fence.gpu_wait(queue, value),
                        None => log::warn!(
                            "FrameGraph: '{}' waits on '{}', which signalled nothing",
                            self.passes[pass.index()].desc.name,
                            self.passes[producer.index()].desc.name
                        ),
                    }
                }
            }

            let lists: Vec<&CommandList> = batch.iter().map(Recorded::list).collect();
            shared
                .device
                .execute_command_lists(queue, &lists)
                .unwrap_or_else(|e| fatal(e.into()));

            for pass in batch.iter().filter_map(Recorded::pass) {
                if self.passes[pass.index()].sync.signal {
                    markers.insert(pass, shared.queue_fence.signal(queue));
                }
            }
            start += len;
        }
        drop(recorded);

        shared
            .device
            .present(index)
            .unwrap_or_else(|e| fatal(e.into()));
        let fence_value = shared.frame_fence.signal(QueueClass::Graphics);
        slot.set_fence_value(fence_value);

        let frame = slot.frame_index();
        log::debug!("FrameGraph: submitted frame {frame} from slot {index}, fence {fence_value}");
        shared.events.emit(FrameEvent::FrameSubmitted {
            frame,
            slot: index,
            fence_value,
        });
    }

    fn wait_for_gpu(&self, index: usize) {
        let shared = &self.shared;
        let slot = &shared.slots[index];
        shared.frame_fence.wait(slot.fence_value());
        shared
            .descriptors
            .retire_frame()
            .and_then(|()| shared.memory.retire_frame())
            .unwrap_or_else(|e| fatal(GraphError::Recycle(e)));

        let frame = slot.frame_index();
        log::debug!("FrameGraph: GPU finished frame {frame} in slot {index}");
        shared
            .events
            .emit(FrameEvent::FrameRetired { frame, slot: index });
    }

    /// The resource pool.
    pub fn pool(&self) -> &ResourcePool {
        &self.shared.pool
    }

    /// Event bus frame and pool events are emitted on.
    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// The device passes are recorded for.
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.shared.device
    }

    /// Configuration the graph was created with.
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Number of frame slots, which is also the number of thread indices.
    pub fn frames_in_flight(&self) -> usize {
        self.ctrls.len()
    }

    /// Frame most recently started. Zero before the first frame.
    pub fn frame_index(&self) -> u64 {
        self.shared.frame_counter.load(Ordering::Acquire)
    }

    /// Frame slot driven by `thread_index`.
    pub fn slot(&self, thread_index: usize) -> Result<&FrameSlot, GraphError> {
        self.shared
            .slots
            .get(thread_index)
            .ok_or(GraphError::InvalidThreadIndex {
                index: thread_index,
                frames: self.frames_in_flight(),
            })
    }

    /// Returns true after a successful [`compile`](Self::compile).
    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Number of registered passes.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Find a pass by name.
    pub fn pass_id(&self, name: &str) -> Option<PassId> {
        self.passes
            .iter()
            .find(|p| p.desc.name == name)
            .map(|p| p.id)
    }

    /// Descriptor `pass` was added with.
    pub fn pass_desc(&self, pass: PassId) -> Option<&PassDesc> {
        self.passes.get(pass.index()).map(|p| &p.desc)
    }

    /// Dependency edges, `(before, after)`. Empty until compiled.
    pub fn edges(&self) -> &[(PassId, PassId)] {
        match &self.compiled {
            Some(compiled) => &compiled.edges,
            None => &[],
        }
    }

    /// Returns true if `pass` signals a marker for a pass on another queue.
    pub fn signals(&self, pass: PassId) -> bool {
        self.passes
            .get(pass.index())
            .is_some_and(|p| p.sync.signal)
    }

    /// Passes on other queues whose markers `pass` waits on.
    pub fn waits(&self, pass: PassId) -> &[PassId] {
        match self.passes.get(pass.index()) {
            Some(entry) => &entry.sync.waits,
            None => &[],
        }
    }
}

impl Drop for FrameGraph {
    fn drop(&mut self) {
        for slot in &self.shared.slots {
            self.shared.frame_fence.wait(slot.fence_value());
        }
        self.shared.pool.clear();
        log::debug!("FrameGraph: released pool after {} frames", self.frame_index());
    }
}

impl std::fmt::Debug for FrameGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameGraph")
            .field("passes", &self.passes.len())
            .field("compiled", &self.is_compiled())
            .field("frame", &self.frame_index())
            .field("pool", &self.shared.pool)
            .finish_non_exhaustive()
    }
}

/// A command list ready for execution, in submission order.
enum Recorded<'a> {
    Pass(PassId, MutexGuard<'a, CommandList>),
    Extra(CommandList),
}

impl Recorded<'_> {
    fn list(&self) -> &CommandList {
        match self {
            Self::Pass(_, list) => &**list,
            Self::Extra(list) => list,
        }
    }

    fn pass(&self) -> Option<PassId> {
        match self {
            Self::Pass(id, _) => Some(*id),
            Self::Extra(_) => None,
        }
    }

    fn queue(&self) -> QueueClass {
        self.list().queue().submit_queue()
    }
}

/// Hazard edges `(i, j)` with `i < j`, ordered by `j` then `i`.
fn dependency_edges(passes: &[PassEntry]) -> Vec<(usize, usize)> {
    let mut edges = Vec::new();
    for (j, later) in passes.iter().enumerate() {
        for (i, earlier) in passes[..j].iter().enumerate() {
            let read_after_write = later
                .resources
                .reads()
                .any(|r| earlier.resources.writes_resource(r.id()));
            let write_after_any = later.resources.writes().any(|r| {
                earlier.resources.writes_resource(r.id()) || earlier.resources.reads_resource(r.id())
            });
            if read_after_write || write_after_any {
                edges.push((i, j));
            }
        }
    }
    edges
}

/// Record on each resource the passes using it, and on each pass the
/// resources it releases.
fn record_resource_users(passes: &mut [PassEntry], pool: &ResourcePool) {
    let mut users: HashMap<ResourceId, Vec<PassId>> = HashMap::new();
    for pass in passes.iter() {
        for resource in pass.resources.all() {
            let list = users.entry(resource.id()).or_default();
            if list.last() != Some(&pass.id) {
                list.push(pass.id);
            }
        }
    }
    let mut releases = Vec::new();
    pool.for_each(|resource| {
        let users = users.remove(&resource.id()).unwrap_or_default();
        if let Some(&last) = users.last() {
            releases.push((last, Arc::clone(resource)));
        }
        resource.set_users(users);
    });
    for (last, resource) in releases {
        if let Some(pass) = passes.get_mut(last.index()) {
            pass.last_uses.push(resource);
        }
    }
}
