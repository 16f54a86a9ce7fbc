use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde_json::Value;

/// Scoped key/value side channel shared by the views of one store.
///
/// Keys are free-form; [`Context::scoped`] treats `"<namespace>."` as a
/// prefix.
#[derive(Default)]
pub struct Context {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.entries.lock().insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.lock().remove(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Entries whose key starts with `"<namespace>."`, sorted by key.
    pub fn scoped(&self, namespace: &str) -> Vec<(String, Value)> {
        let prefix = format!("{namespace}.");
        self.entries
            .lock()
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}
