use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::error;
use crate::scheduler::{task, Scheduler, Task};
use crate::state::observed::{wrap_value, ChangeSink, IntoObserved, Observed, ObservedMap};
use crate::state::StateError;

type StateCallback = Arc<dyn Fn(&Observed) + Send + Sync>;

/// Root of an observable tree plus its per-property subscribers.
///
/// Notifications are never delivered synchronously: a write records
/// `(property, value)` and queues one dispatch task on the scheduler. Several
/// writes to the same property before the flush deliver only the latest
/// value.
#[derive(Clone)]
pub struct ObservableState {
    inner: Arc<StateInner>,
}

struct StateInner {
    root: Mutex<ObservedMap>,
    sink: ChangeSink,
    scheduler: Scheduler,
    subscribers: Mutex<HashMap<String, Vec<(u64, StateCallback)>>>,
    pending: Mutex<Vec<(String, Observed)>>,
    dispatch: Task,
    next_id: AtomicU64,
}

impl ObservableState {
    /// Empty state whose notifications go through `scheduler`.
    pub fn new(scheduler: Scheduler) -> Self {
        Self::with_root(Map::new(), scheduler)
    }

    pub fn with_root(root: Map<String, Value>, scheduler: Scheduler) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<StateInner>| {
            let sink_ref = weak.clone();
            let sink: ChangeSink = Arc::new(move |property: &str, value: &Observed| {
                if let Some(inner) = sink_ref.upgrade() {
                    inner.queue(property, value.clone());
                }
            });
            let dispatch_ref = weak.clone();
            let dispatch = task(move || {
                if let Some(inner) = dispatch_ref.upgrade() {
                    inner.dispatch();
                }
            });
            StateInner {
                root: Mutex::new(wrap_root(root, &sink)),
                sink,
                scheduler,
                subscribers: Mutex::new(HashMap::new()),
                pending: Mutex::new(Vec::new()),
                dispatch,
                next_id: AtomicU64::new(1),
            }
        });
        Self { inner }
    }

    /// Wrap `value` for this tree. Scalars pass through, handles are
    /// returned unchanged.
    pub fn wrap(&self, value: impl IntoObserved) -> Observed {
        value.into_observed(&self.inner.sink)
    }

    /// Fresh empty mapping bound to this tree's sink.
    pub fn new_map(&self) -> ObservedMap {
        ObservedMap::from_entries(BTreeMap::new(), self.inner.sink.clone())
    }

    /// Handle to the root mapping.
    pub fn root(&self) -> ObservedMap {
        self.inner.root.lock().clone()
    }

    pub fn get(&self, property: &str) -> Option<Observed> {
        self.root().get(property)
    }

    pub fn set(&self, property: impl Into<String>, value: impl IntoObserved) -> bool {
        self.root().set(property, value)
    }

    /// Call `callback` with the new value whenever `property` changes.
    pub fn subscribe<F>(&self, property: impl Into<String>, callback: F) -> StateSubscription
    where
        F: Fn(&Observed) + Send + Sync + 'static,
    {
        let property = property.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .entry(property.clone())
            .or_default()
            .push((id, Arc::new(callback)));
        StateSubscription {
            state: Arc::downgrade(&self.inner),
            property,
            id,
        }
    }

    pub fn subscriber_count(&self, property: &str) -> usize {
        self.inner
            .subscribers
            .lock()
            .get(property)
            .map_or(0, Vec::len)
    }

    /// Plain deep copy of the whole tree.
    pub fn snapshot(&self) -> Result<Value, StateError> {
        Observed::Map(self.root()).to_value()
    }

    /// Replace the tree without notifying anyone.
    pub fn replace_root(&self, root: Map<String, Value>) {
        let wrapped = wrap_root(root, &self.inner.sink);
        *self.inner.root.lock() = wrapped;
    }

    /// Serialize to a JSON string, stripping wrapper identity.
    pub fn serialize(&self) -> Result<String, StateError> {
        Ok(serde_json::to_string(&self.snapshot()?)?)
    }

    /// Replace the tree from `serialized` and re-notify every top-level key.
    pub fn hydrate(&self, serialized: &str) -> Result<(), StateError> {
        let parsed: Value = serde_json::from_str(serialized)?;
        let Value::Object(root) = parsed else {
            return Err(StateError::RootNotObject);
        };
        self.replace_root(root);
        for (property, value) in self.root().entries() {
            self.inner.queue(&property, value);
        }
        Ok(())
    }
}

impl StateInner {
    fn queue(&self, property: &str, value: Observed) {
        {
            let mut pending = self.pending.lock();
            match pending.iter_mut().find(|(p, _)| p == property) {
                Some(slot) => slot.1 = value,
                None => pending.push((property.to_string(), value)),
            }
        }
        self.scheduler.enqueue(&self.dispatch);
    }

    fn dispatch(&self) {
        let pending = std::mem::take(&mut *self.pending.lock());
        for (property, value) in pending {
            let callbacks: Vec<StateCallback> = self
                .subscribers
                .lock()
                .get(&property)
                .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default();
            for callback in callbacks {
                if let Err(failure) = error::guard("state.subscriber", || callback(&value)) {
                    self.scheduler.report_failure(failure);
                }
            }
        }
    }
}

fn wrap_root(root: Map<String, Value>, sink: &ChangeSink) -> ObservedMap {
    let entries = root
        .into_iter()
        .map(|(key, value)| (key, wrap_value(value, sink)))
        .collect();
    ObservedMap::from_entries(entries, sink.clone())
}

/// Handle returned by [`ObservableState::subscribe`].
///
/// Dropping it keeps the subscription; call [`unsubscribe`](Self::unsubscribe)
/// to remove it. Removing twice is a no-op.
pub struct StateSubscription {
    state: Weak<StateInner>,
    property: String,
    id: u64,
}

impl StateSubscription {
    pub fn unsubscribe(&self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut subscribers = state.subscribers.lock();
        if let Some(subs) = subscribers.get_mut(&self.property) {
            subs.retain(|(id, _)| *id != self.id);
            if subs.is_empty() {
                subscribers.remove(&self.property);
            }
        }
    }
}
