//! Frame lifecycle notifications.

use std::sync::Arc;

use parking_lot::RwLock;

/// Something that happened to a frame or the resource pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A render thread finished recording `frame` into `slot`.
    FrameRecorded { frame: u64, slot: usize },
    /// `frame` was submitted and presented; the slot fence reaches
    /// `fence_value` when the GPU is done with it.
    FrameSubmitted {
        frame: u64,
        slot: usize,
        fence_value: u64,
    },
    /// The GPU finished `frame` and its transient memory was recycled.
    FrameRetired { frame: u64, slot: usize },
    /// A pool resource went untouched for too long and was released.
    ResourceEvicted { name: String, frame: u64 },
    /// The pipeline was asked to stop.
    QuitRequested,
    /// Render thread `thread` hit a fatal error and stopped the pipeline.
    PipelineHalted { thread: usize, reason: String },
}

/// Callback registered on an [`EventBus`].
pub type EventObserver = Arc<dyn Fn(&FrameEvent) + Send + Sync>;

/// Observer list shared by a frame graph and whatever drives it.
///
/// Cloning the bus shares the observer list. Observers run synchronously
/// on the emitting thread, so they should be quick and must not block on
/// the frame pipeline.
#[derive(Clone, Default)]
pub struct EventBus {
    observers: Arc<RwLock<Vec<EventObserver>>>,
}

impl EventBus {
    /// A bus with no observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer for every later event.
    pub fn subscribe<F>(&self, observer: F)
    where
        F: Fn(&FrameEvent) + Send + Sync + 'static,
    {
        self.observers.write().push(Arc::new(observer));
    }

    /// Deliver `event` to every observer, in subscription order.
    pub fn emit(&self, event: FrameEvent) {
        // Snapshot so observers may subscribe without deadlocking.
        let observers = self.observers.read().clone();
        for observer in &observers {
            observer(&event);
        }
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.observer_count())
            .finish()
    }
}
