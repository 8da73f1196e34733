//! Dummy device for testing and development.
//!
//! This device doesn't perform any GPU work. It hands out fresh handles,
//! records every call as a [`DeviceEvent`] so tests can inspect what the
//! frame graph asked for, and completes fences either immediately or after
//! a fixed delay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::{
    BufferHandle, Command, CommandList, FenceHandle, GpuDevice, GpuResource, TextureHandle,
};
use crate::error::DeviceError;
use crate::memory::MemoryLocation;
use crate::types::{BufferDescriptor, QueueClass, TextureDescriptor};

/// A command list as it was when submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedList {
    pub name: String,
    pub commands: Vec<Command>,
}

/// One call made on a [`DummyDevice`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    CreateBuffer {
        handle: BufferHandle,
        label: Option<String>,
        placement: MemoryLocation,
        alias_of: Option<BufferHandle>,
    },
    CreateTexture {
        handle: TextureHandle,
        label: Option<String>,
        placement: MemoryLocation,
        alias_of: Option<TextureHandle>,
    },
    DestroyBuffer(BufferHandle),
    DestroyTexture(TextureHandle),
    CreateDescriptor {
        resource: GpuResource,
        cpu_slot: u64,
    },
    CopyDescriptor {
        gpu_slot: u64,
        cpu_slot: u64,
    },
    WriteConstants {
        offset: u64,
        len: usize,
    },
    Execute {
        queue: QueueClass,
        lists: Vec<RecordedList>,
    },
    Signal {
        queue: QueueClass,
        fence: FenceHandle,
        value: u64,
    },
    Wait {
        queue: QueueClass,
        fence: FenceHandle,
        value: u64,
    },
    Present {
        slot: usize,
    },
}

#[derive(Default)]
struct Fences {
    completed: HashMap<FenceHandle, u64>,
}

struct FenceState {
    fences: Mutex<Fences>,
    reached: Condvar,
}

impl FenceState {
    fn complete(&self, fence: FenceHandle, value: u64) {
        let mut fences = self.fences.lock();
        let completed = fences.completed.entry(fence).or_insert(0);
        *completed = (*completed).max(value);
        self.reached.notify_all();
    }
}

/// Recording [`GpuDevice`] with no GPU behind it.
pub struct DummyDevice {
    next_handle: AtomicU64,
    events: Mutex<Vec<DeviceEvent>>,
    fence_state: Arc<FenceState>,
    completion_delay: Duration,
    fail_creation: bool,
}

impl DummyDevice {
    /// Create a device whose fences complete as soon as they are signalled.
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            events: Mutex::new(Vec::new()),
            fence_state: Arc::new(FenceState {
                fences: Mutex::new(Fences::default()),
                reached: Condvar::new(),
            }),
            completion_delay: Duration::ZERO,
            fail_creation: false,
        }
    }

    /// Complete signalled fence values only after `delay`.
    pub fn with_completion_delay(mut self, delay: Duration) -> Self {
        self.completion_delay = delay;
        self
    }

    /// Make every resource creation fail.
    pub fn with_failing_creation(mut self) -> Self {
        self.fail_creation = true;
        self
    }

    /// Snapshot of every recorded call, in call order.
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.events.lock().clone()
    }

    /// Forget the recorded calls.
    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    /// Buffers and textures created but not yet destroyed.
    pub fn live_resource_count(&self) -> usize {
        let events = self.events.lock();
        let created = events
            .iter()
            .filter(|e| matches!(e, DeviceEvent::CreateBuffer { .. } | DeviceEvent::CreateTexture { .. }))
            .count();
        let destroyed = events
            .iter()
            .filter(|e| matches!(e, DeviceEvent::DestroyBuffer(_) | DeviceEvent::DestroyTexture(_)))
            .count();
        created - destroyed
    }

    /// Names of the submitted lists, in submission order.
    pub fn submitted_list_names(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::Execute { lists, .. } => Some(lists.iter().map(|l| l.name.clone())),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn record(&self, event: DeviceEvent) {
        log::trace!("DummyDevice: {event:?}");
        self.events.lock().push(event);
    }

    fn next_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DummyDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyDevice")
            .field("events", &self.events.lock().len())
            .field("completion_delay", &self.completion_delay)
            .finish_non_exhaustive()
    }
}

impl GpuDevice for DummyDevice {
    fn name(&self) -> &str {
        "Dummy"
    }

    fn create_buffer(
        &self,
        descriptor: &BufferDescriptor,
        placement: &MemoryLocation,
        alias_of: Option<BufferHandle>,
    ) -> Result<BufferHandle, DeviceError> {
        if self.fail_creation {
            return Err(DeviceError::ResourceCreationFailed(format!(
                "buffer {:?}",
                descriptor.label
            )));
        }
        let handle = BufferHandle(self.next_handle());
        self.record(DeviceEvent::CreateBuffer {
            handle,
            label: descriptor.label.clone(),
            placement: *placement,
            alias_of,
        });
        Ok(handle)
    }

    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
        placement: &MemoryLocation,
        alias_of: Option<TextureHandle>,
    ) -> Result<TextureHandle, DeviceError> {
        if self.fail_creation {
            return Err(DeviceError::ResourceCreationFailed(format!(
                "texture {:?}",
                descriptor.label
            )));
        }
        let handle = TextureHandle(self.next_handle());
        self.record(DeviceEvent::CreateTexture {
            handle,
            label: descriptor.label.clone(),
            placement: *placement,
            alias_of,
        });
        Ok(handle)
    }

    fn destroy_buffer(&self, handle: BufferHandle) {
        self.record(DeviceEvent::DestroyBuffer(handle));
    }

    fn destroy_texture(&self, handle: TextureHandle) {
        self.record(DeviceEvent::DestroyTexture(handle));
    }

    fn create_descriptor(&self, resource: GpuResource, cpu_slot: u64) {
        self.record(DeviceEvent::CreateDescriptor { resource, cpu_slot });
    }

    fn copy_descriptor(&self, gpu_slot: u64, cpu_slot: u64) {
        self.record(DeviceEvent::CopyDescriptor { gpu_slot, cpu_slot });
    }

    fn write_constants(&self, offset: u64, data: &[u8]) {
        self.record(DeviceEvent::WriteConstants {
            offset,
            len: data.len(),
        });
    }

    fn execute_command_lists(
        &self,
        queue: QueueClass,
        lists: &[&CommandList],
    ) -> Result<(), DeviceError> {
        if let Some(open) = lists.iter().find(|l| !l.is_closed()) {
            return Err(DeviceError::SubmissionFailed(format!(
                "command list '{}' was not closed",
                open.name()
            )));
        }
        self.record(DeviceEvent::Execute {
            queue,
            lists: lists
                .iter()
                .map(|l| RecordedList {
                    name: l.name().to_string(),
                    commands: l.commands().to_vec(),
                })
                .collect(),
        });
        Ok(())
    }

    fn create_fence(&self) -> FenceHandle {
        let handle = FenceHandle(self.next_handle());
        self.fence_state.fences.lock().completed.insert(handle, 0);
        handle
    }

    fn signal(&self, queue: QueueClass, fence: FenceHandle, value: u64) {
        self.record(DeviceEvent::Signal {
            queue,
            fence,
            value,
        });
        if self.completion_delay.is_zero() {
            self.fence_state.complete(fence, value);
        } else {
            let state = Arc::clone(&self.fence_state);
            let delay = self.completion_delay;
            thread::spawn(move || {
                thread::sleep(delay);
                state.complete(fence, value);
            });
        }
    }

    fn wait(&self, queue: QueueClass, fence: FenceHandle, value: u64) {
        self.record(DeviceEvent::Wait {
            queue,
            fence,
            value,
        });
    }

    fn completed_value(&self, fence: FenceHandle) -> u64 {
        self.fence_state
            .fences
            .lock()
            .completed
            .get(&fence)
            .copied()
            .unwrap_or(0)
    }

    fn wait_for_value(&self, fence: FenceHandle, value: u64) {
        let mut fences = self.fence_state.fences.lock();
        while fences.completed.get(&fence).copied().unwrap_or(0) < value {
            self.fence_state.reached.wait(&mut fences);
        }
    }

    fn present(&self, slot: usize) -> Result<(), DeviceError> {
        self.record(DeviceEvent::Present { slot });
        Ok(())
    }
}
