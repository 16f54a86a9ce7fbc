use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::state::StateError;

/// Receives `(property, new value)` for every effective write.
pub type ChangeSink = Arc<dyn Fn(&str, &Observed) + Send + Sync>;

/// A value inside an observable tree.
///
/// Compound values are shared handles: cloning an `Observed::Map` yields the
/// same underlying map, and [`Observed::ptr_eq`] tells two handles apart.
#[derive(Clone)]
pub enum Observed {
    Scalar(Value),
    Map(ObservedMap),
    List(ObservedList),
}

impl Observed {
    /// Identity for compounds, value equality for scalars.
    pub fn ptr_eq(a: &Observed, b: &Observed) -> bool {
        match (a, b) {
            (Observed::Scalar(x), Observed::Scalar(y)) => x == y,
            (Observed::Map(x), Observed::Map(y)) => Arc::ptr_eq(&x.inner, &y.inner),
            (Observed::List(x), Observed::List(y)) => Arc::ptr_eq(&x.inner, &y.inner),
            _ => false,
        }
    }

    pub fn as_map(&self) -> Option<&ObservedMap> {
        match self {
            Observed::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ObservedList> {
        match self {
            Observed::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Observed::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// Plain deep copy with wrapper identity stripped.
    ///
    /// # Errors
    /// [`StateError::Cyclic`] if a handle contains itself.
    pub fn to_value(&self) -> Result<Value, StateError> {
        let mut ancestors = Vec::new();
        self.to_value_inner(&mut ancestors)
    }

    fn to_value_inner(&self, ancestors: &mut Vec<*const ()>) -> Result<Value, StateError> {
        match self {
            Observed::Scalar(value) => Ok(value.clone()),
            Observed::Map(map) => {
                let id = Arc::as_ptr(&map.inner) as *const ();
                if ancestors.contains(&id) {
                    return Err(StateError::Cyclic);
                }
                ancestors.push(id);
                let mut out = Map::new();
                for (key, child) in map.entries() {
                    out.insert(key, child.to_value_inner(ancestors)?);
                }
                ancestors.pop();
                Ok(Value::Object(out))
            }
            Observed::List(list) => {
                let id = Arc::as_ptr(&list.inner) as *const ();
                if ancestors.contains(&id) {
                    return Err(StateError::Cyclic);
                }
                ancestors.push(id);
                let mut out = Vec::new();
                for child in list.items() {
                    out.push(child.to_value_inner(ancestors)?);
                }
                ancestors.pop();
                Ok(Value::Array(out))
            }
        }
    }
}

impl std::fmt::Debug for Observed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_value() {
            Ok(value) => write!(f, "Observed({})", value),
            Err(_) => write!(f, "Observed(<cyclic>)"),
        }
    }
}

/// Anything that can be stored in an observable tree.
pub trait IntoObserved {
    fn into_observed(self, sink: &ChangeSink) -> Observed;
}

impl IntoObserved for Value {
    fn into_observed(self, sink: &ChangeSink) -> Observed {
        wrap_value(self, sink)
    }
}

impl IntoObserved for Observed {
    fn into_observed(self, _sink: &ChangeSink) -> Observed {
        self
    }
}

impl IntoObserved for ObservedMap {
    fn into_observed(self, _sink: &ChangeSink) -> Observed {
        Observed::Map(self)
    }
}

impl IntoObserved for ObservedList {
    fn into_observed(self, _sink: &ChangeSink) -> Observed {
        Observed::List(self)
    }
}

pub(crate) fn wrap_value(value: Value, sink: &ChangeSink) -> Observed {
    match value {
        Value::Object(entries) => {
            let wrapped = entries
                .into_iter()
                .map(|(key, child)| (key, wrap_value(child, sink)))
                .collect();
            Observed::Map(ObservedMap::from_entries(wrapped, sink.clone()))
        }
        Value::Array(items) => {
            let wrapped = items.into_iter().map(|item| wrap_value(item, sink)).collect();
            Observed::List(ObservedList::from_items(wrapped, sink.clone()))
        }
        scalar => Observed::Scalar(scalar),
    }
}

/// Observable mapping node.
#[derive(Clone)]
pub struct ObservedMap {
    inner: Arc<Mutex<MapNode>>,
}

struct MapNode {
    entries: BTreeMap<String, Observed>,
    sink: ChangeSink,
}

impl ObservedMap {
    pub(crate) fn from_entries(entries: BTreeMap<String, Observed>, sink: ChangeSink) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MapNode { entries, sink })),
        }
    }

    /// Child at `key`; compound children come back as the stored handle.
    pub fn get(&self, key: &str) -> Option<Observed> {
        self.inner.lock().entries.get(key).cloned()
    }

    /// Store `value` under `key`, notifying the sink if it changed.
    ///
    /// Returns `true` when the stored value changed.
    pub fn set(&self, key: impl Into<String>, value: impl IntoObserved) -> bool {
        let key = key.into();
        let (changed, sink, stored) = {
            let mut node = self.inner.lock();
            let stored = value.into_observed(&node.sink);
            let changed = match node.entries.get(&key) {
                Some(old) => !Observed::ptr_eq(old, &stored),
                None => true,
            };
            if changed {
                node.entries.insert(key.clone(), stored.clone());
            }
            (changed, node.sink.clone(), stored)
        };
        if changed {
            sink(&key, &stored);
        }
        changed
    }

    /// Remove `key`, notifying with `null` if it existed.
    pub fn remove(&self, key: &str) -> Option<Observed> {
        let (removed, sink) = {
            let mut node = self.inner.lock();
            (node.entries.remove(key), node.sink.clone())
        };
        if removed.is_some() {
            sink(key, &Observed::Scalar(Value::Null));
        }
        removed
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Snapshot of the entries; compound values are shared handles.
    pub fn entries(&self) -> Vec<(String, Observed)> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Observable sequence node. Notifications use the index as property name.
#[derive(Clone)]
pub struct ObservedList {
    inner: Arc<Mutex<ListNode>>,
}

struct ListNode {
    items: Vec<Observed>,
    sink: ChangeSink,
}

impl ObservedList {
    pub(crate) fn from_items(items: Vec<Observed>, sink: ChangeSink) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ListNode { items, sink })),
        }
    }

    pub fn get(&self, index: usize) -> Option<Observed> {
        self.inner.lock().items.get(index).cloned()
    }

    /// Replace the item at `index`. Out-of-range indices are ignored.
    pub fn set(&self, index: usize, value: impl IntoObserved) -> bool {
        let (changed, sink, stored) = {
            let mut node = self.inner.lock();
            let stored = value.into_observed(&node.sink);
            let changed = match node.items.get(index) {
                Some(old) => !Observed::ptr_eq(old, &stored),
                None => false,
            };
            if changed {
                node.items[index] = stored.clone();
            }
            (changed, node.sink.clone(), stored)
        };
        if changed {
            sink(&index.to_string(), &stored);
        }
        changed
    }

    pub fn push(&self, value: impl IntoObserved) {
        let (index, sink, stored) = {
            let mut node = self.inner.lock();
            let stored = value.into_observed(&node.sink);
            node.items.push(stored.clone());
            (node.items.len() - 1, node.sink.clone(), stored)
        };
        sink(&index.to_string(), &stored);
    }

    pub fn pop(&self) -> Option<Observed> {
        let (popped, index, sink) = {
            let mut node = self.inner.lock();
            let popped = node.items.pop();
            (popped, node.items.len(), node.sink.clone())
        };
        if popped.is_some() {
            sink(&index.to_string(), &Observed::Scalar(Value::Null));
        }
        popped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn items(&self) -> Vec<Observed> {
        self.inner.lock().items.clone()
    }
}
