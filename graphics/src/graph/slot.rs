//! Per frame-in-flight state.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use super::PassId;
use crate::backend::{CommandList, GpuDevice};
use crate::error::GraphError;
use crate::memory::{MemoryLocation, ResourceAllocator};

/// A command list waiting for the submit phase.
pub(crate) enum Submission {
    /// The list a pass recorded into for this slot.
    Pass(PassId),
    /// An extra list handed over by a pass.
    Extra(CommandList),
}

struct ConstantBlock {
    type_name: &'static str,
    bytes: Vec<u8>,
    location: Option<MemoryLocation>,
}

/// Everything one frame in flight owns: its submission order, its fence
/// value and its frame constants.
///
/// Slots are indexed by thread index and never shared across threads, so
/// their locks only order a pass's own recording against the render
/// thread's submit phase.
pub struct FrameSlot {
    index: usize,
    frame: AtomicU64,
    fence_value: AtomicU64,
    constant_descriptor: u64,
    submissions: Mutex<Vec<Submission>>,
    constants: RwLock<HashMap<TypeId, ConstantBlock>>,
}

impl FrameSlot {
    pub(crate) fn new(index: usize, constant_descriptor: u64) -> Self {
        Self {
            index,
            frame: AtomicU64::new(0),
            fence_value: AtomicU64::new(0),
            constant_descriptor,
            submissions: Mutex::new(Vec::new()),
            constants: RwLock::new(HashMap::new()),
        }
    }

    /// Slot index, equal to the thread index that drives it.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Frame most recently recorded into this slot.
    pub fn frame_index(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    /// Frame fence value that marks this slot's last submission complete.
    pub fn fence_value(&self) -> u64 {
        self.fence_value.load(Ordering::Acquire)
    }

    /// Reserved shader-visible descriptor slot for this slot's constants.
    pub fn constant_descriptor(&self) -> u64 {
        self.constant_descriptor
    }

    /// Where the constants of type `T` were written for the current frame.
    pub fn constants<T: 'static>(&self) -> Option<MemoryLocation> {
        self.constants
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|block| block.location)
    }

    pub(crate) fn stage_constants<T: bytemuck::Pod>(&self, value: &T) {
        let bytes = bytemuck::bytes_of(value).to_vec();
        let mut constants = self.constants.write();
        let block = constants
            .entry(TypeId::of::<T>())
            .or_insert_with(|| ConstantBlock {
                type_name: type_name::<T>(),
                bytes: Vec::new(),
                location: None,
            });
        block.bytes = bytes;
    }

    /// Carve this frame's constant blocks out of the ring and upload them.
    pub(crate) fn bind_constants(
        &self,
        memory: &ResourceAllocator,
        device: &dyn GpuDevice,
    ) -> Result<(), GraphError> {
        let mut constants = self.constants.write();
        for block in constants.values_mut() {
            let location = memory
                .allocate_constants(block.bytes.len() as u64)
                .map_err(|source| GraphError::OutOfMemory {
                    name: block.type_name.to_string(),
                    source,
                })?;
            device.write_constants(location.offset, &block.bytes);
            block.location = Some(location);
        }
        Ok(())
    }

    pub(crate) fn begin_frame(&self, frame: u64) {
        self.frame.store(frame, Ordering::Release);
        self.submissions.lock().clear();
    }

    pub(crate) fn push_submission(&self, submission: Submission) {
        self.submissions.lock().push(submission);
    }

    pub(crate) fn lock_submissions(&self) -> parking_lot::MutexGuard<'_, Vec<Submission>> {
        self.submissions.lock()
    }

    pub(crate) fn take_submissions(&self) -> Vec<Submission> {
        std::mem::take(&mut *self.submissions.lock())
    }

    pub(crate) fn set_fence_value(&self, value: u64) {
        self.fence_value.store(value, Ordering::Release);
    }
}

impl std::fmt::Debug for FrameSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSlot")
            .field("index", &self.index)
            .field("frame", &self.frame_index())
            .field("fence_value", &self.fence_value())
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::{DeviceEvent, DummyDevice};
    use crate::config::GraphConfig;

    #[repr(C)]
    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    struct Exposure {
        value: f32,
        _pad: [f32; 3],
    }

    #[test]
    fn test_staged_constants_bind_per_frame() {
        let memory = ResourceAllocator::new(&GraphConfig::default());
        let device = DummyDevice::new();
        let slot = FrameSlot::new(0, 1);

        slot.stage_constants(&Exposure {
            value: 1.5,
            _pad: [0.0; 3],
        });
        assert!(slot.constants::<Exposure>().is_none());

        slot.bind_constants(&memory, &device).unwrap();
        let location = slot.constants::<Exposure>().unwrap();
        assert_eq!(location.size, 256);
        assert_eq!(
            device.events(),
            vec![DeviceEvent::WriteConstants {
                offset: location.offset,
                len: 16
            }]
        );
    }

    #[test]
    fn test_begin_frame_drops_old_submissions() {
        let slot = FrameSlot::new(2, 0);
        slot.push_submission(Submission::Pass(PassId::new(0)));
        slot.begin_frame(9);
        assert!(slot.take_submissions().is_empty());
        assert_eq!(slot.frame_index(), 9);
        assert_eq!(slot.index(), 2);
    }
}
