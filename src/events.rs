//! Topic-based publish/subscribe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{self, CallbackFailure};

pub type EventListener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identifies one registration made with [`EventBus::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Outcome of one [`EventBus::emit`].
#[derive(Debug, Default)]
pub struct EmitReport {
    pub delivered: usize,
    pub failures: Vec<CallbackFailure>,
}

/// Synchronous event bus. Cloning shares the registry.
///
/// Listeners run in registration order on the emitting thread, each inside
/// its own panic guard, with no lock held.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    topics: Mutex<HashMap<String, Vec<(ListenerId, EventListener)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, topic: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .topics
            .lock()
            .entry(topic.into())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove one listener. Returns whether it was registered.
    pub fn off(&self, topic: &str, id: ListenerId) -> bool {
        let mut topics = self.inner.topics.lock();
        let Some(listeners) = topics.get_mut(topic) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            topics.remove(topic);
        }
        removed
    }

    pub fn emit(&self, topic: &str, payload: &Value) -> EmitReport {
        let listeners: Vec<EventListener> = self
            .inner
            .topics
            .lock()
            .get(topic)
            .map(|l| l.iter().map(|(_, f)| Arc::clone(f)).collect())
            .unwrap_or_default();

        let mut report = EmitReport::default();
        for listener in listeners {
            match error::guard("events.listener", || listener(payload)) {
                Ok(()) => report.delivered += 1,
                Err(failure) => report.failures.push(failure),
            }
        }
        tracing::trace!(topic = %topic, delivered = report.delivered, "Event emitted");
        report
    }

    /// Drop every listener of `topic`.
    pub fn clear(&self, topic: &str) {
        self.inner.topics.lock().remove(topic);
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.inner.topics.lock().get(topic).map_or(0, Vec::len)
    }
}
