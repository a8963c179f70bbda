//! Event recording listener.

use parking_lot::Mutex;

use docstore_driver_pool::{PoolEvent, PoolEventKind, PoolListener};

/// [`PoolListener`] that records every event it observes.
///
/// Install via the pool builder and assert on [`EventRecorder::kinds`]
/// afterwards; events are recorded in emission order.
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<PoolEvent>>,
}

impl EventRecorder {
    /// An empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded event, in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<PoolEvent> {
        self.events.lock().clone()
    }

    /// The kinds of every recorded event, in emission order.
    #[must_use]
    pub fn kinds(&self) -> Vec<PoolEventKind> {
        self.events.lock().iter().map(|e| e.kind.clone()).collect()
    }

    /// How many recorded events satisfy `predicate`.
    #[must_use]
    pub fn count(&self, predicate: impl Fn(&PoolEventKind) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(&e.kind)).count()
    }

    /// Total number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl PoolListener for EventRecorder {
    fn on_event(&self, event: &PoolEvent) {
        self.events.lock().push(event.clone());
    }
}
