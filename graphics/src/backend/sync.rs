//! Completion markers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{FenceHandle, GpuDevice};
use crate::types::QueueClass;

/// A monotonically increasing GPU progress counter.
///
/// Each [`signal`](Self::signal) hands out the next value and asks a queue
/// to reach it; the CPU can then [`wait`](Self::wait) for it, and other
/// queues can [`gpu_wait`](Self::gpu_wait) on it.
pub struct Fence {
    device: Arc<dyn GpuDevice>,
    handle: FenceHandle,
    next_value: AtomicU64,
}

impl Fence {
    /// Create a fence at value 0.
    pub fn new(device: Arc<dyn GpuDevice>) -> Self {
        let handle = device.create_fence();
        Self {
            device,
            handle,
            next_value: AtomicU64::new(1),
        }
    }

    /// Device handle of the fence.
    pub fn handle(&self) -> FenceHandle {
        self.handle
    }

    /// Signal the next value on `queue` and return it.
    pub fn signal(&self, queue: QueueClass) -> u64 {
        let value = self.next_value.fetch_add(1, Ordering::AcqRel);
        self.device.signal(queue.submit_queue(), self.handle, value);
        value
    }

    /// Make `queue` wait until the fence reaches `value`.
    pub fn gpu_wait(&self, queue: QueueClass, value: u64) {
        self.device.wait(queue.submit_queue(), self.handle, value);
    }

    /// Block until the fence reaches `value`.
    pub fn wait(&self, value: u64) {
        if self.completed_value() < value {
            self.device.wait_for_value(self.handle, value);
        }
    }

    /// Highest value the GPU has reached.
    pub fn completed_value(&self) -> u64 {
        self.device.completed_value(self.handle)
    }

    /// Returns true once `value` has been reached.
    pub fn is_complete(&self, value: u64) -> bool {
        self.completed_value() >= value
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("handle", &self.handle)
            .field("next_value", &self.next_value.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;
    use std::time::Duration;

    #[test]
    fn test_values_are_monotonic() {
        let fence = Fence::new(Arc::new(DummyDevice::new()));
        let a = fence.signal(QueueClass::Graphics);
        let b = fence.signal(QueueClass::Compute);
        assert!(b > a);
        fence.wait(b);
        assert!(fence.is_complete(a));
    }

    #[test]
    fn test_wait_blocks_until_delayed_completion() {
        let device = Arc::new(DummyDevice::new().with_completion_delay(Duration::from_millis(20)));
        let fence = Fence::new(device);
        let value = fence.signal(QueueClass::Graphics);
        assert!(!fence.is_complete(value));
        fence.wait(value);
        assert!(fence.is_complete(value));
    }
}
