use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::config::StoreConfig;
use crate::error;
use crate::scheduler::{task, Scheduler, Task};
use crate::state::{ObservableState, Observed, ObservedMap};
use crate::store::context::Context;
use crate::store::migrate::{apply_migrations, Migration};
use crate::store::path::{deep_merge, is_descendant, is_related, validate_namespace};
use crate::store::persist::{KvStorage, MemoryStorage};
use crate::store::StoreError;

/// Namespace listener; receives the namespace's current value.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;
type Deriver = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Result of [`Store::load_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Persisted tree merged over the defaults.
    Restored,
    /// Nothing stored; state left as it was.
    Missing,
    /// Stored record unparsable; state reset to the defaults.
    Corrupt,
    /// Storage backend failed; state left as it was.
    Unavailable,
}

#[derive(Default)]
struct Namespace {
    listeners: Vec<(u64, Listener)>,
    derive: Option<Deriver>,
}

/// Namespaced, persisted application state.
///
/// Cloning is cheap and every clone addresses the same store. Writes mark
/// affected namespaces pending with a deadline `debounce` in the future;
/// the dispatch task runs on the scheduler and notifies each namespace whose
/// deadline has passed with its latest value, re-queueing itself while
/// anything is still waiting.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    config: StoreConfig,
    state: ObservableState,
    scheduler: Scheduler,
    storage: Arc<dyn KvStorage>,
    defaults: Map<String, Value>,
    namespaces: Mutex<BTreeMap<String, Namespace>>,
    derived: Mutex<HashMap<String, Value>>,
    pending: Mutex<BTreeMap<String, Instant>>,
    dispatch: Task,
    next_id: AtomicU64,
    context: Context,
}

impl Store {
    /// Build a store over `storage`, seeding the tree with `defaults`
    /// (an object or `null`) overlaid by whatever was persisted.
    pub fn open(
        scheduler: Scheduler,
        storage: Arc<dyn KvStorage>,
        config: StoreConfig,
        defaults: Value,
    ) -> Self {
        let defaults = match defaults {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => {
                tracing::warn!("Store defaults must be an object, ignoring them");
                Map::new()
            }
        };

        let inner = Arc::new_cyclic(|weak: &Weak<StoreInner>| {
            let dispatch_ref = weak.clone();
            let dispatch = task(move || {
                if let Some(inner) = dispatch_ref.upgrade() {
                    Store { inner }.dispatch();
                }
            });
            StoreInner {
                config,
                state: ObservableState::new(scheduler.clone()),
                scheduler,
                storage,
                defaults,
                namespaces: Mutex::new(BTreeMap::new()),
                derived: Mutex::new(HashMap::new()),
                pending: Mutex::new(BTreeMap::new()),
                dispatch,
                next_id: AtomicU64::new(1),
                context: Context::new(),
            }
        });

        let store = Self { inner };
        let (root, outcome) = store.restore();
        store.inner.state.replace_root(root);
        tracing::debug!(
            storage_key = %store.inner.config.storage_key,
            outcome = ?outcome,
            "Store opened"
        );
        store
    }

    /// Store backed by a fresh [`MemoryStorage`].
    pub fn in_memory(scheduler: Scheduler, config: StoreConfig) -> Self {
        Self::open(scheduler, Arc::new(MemoryStorage::new()), config, Value::Null)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// The underlying observable tree.
    pub fn state(&self) -> &ObservableState {
        &self.inner.state
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    /// Register `path` and install `initial` there unless a restored value
    /// already occupies it.
    pub fn create_namespace(&self, path: &str, initial: Value) -> Result<(), StoreError> {
        validate_namespace(path)?;
        if self.inner.namespaces.lock().contains_key(path) {
            tracing::warn!(namespace = %path, "Namespace already exists, skipping");
            return Err(StoreError::NamespaceExists {
                namespace: path.to_string(),
            });
        }

        let before = self.snapshot_related(path);
        if self.lookup(path).is_some() {
            tracing::debug!(namespace = %path, "Keeping restored value for namespace");
        } else {
            self.install(path, initial)?;
        }
        self.inner
            .namespaces
            .lock()
            .insert(path.to_string(), Namespace::default());
        self.mark_changed(before);
        tracing::debug!(namespace = %path, "Namespace created");
        Ok(())
    }

    pub fn has_namespace(&self, path: &str) -> bool {
        self.inner.namespaces.lock().contains_key(path)
    }

    /// Created namespaces in lexical order.
    pub fn namespaces(&self) -> Vec<String> {
        self.inner.namespaces.lock().keys().cloned().collect()
    }

    /// Plain copy of the value at `path`, or `None` when nothing is there or
    /// the path is malformed.
    pub fn get_state(&self, path: &str) -> Option<Value> {
        validate_namespace(path).ok()?;
        let node = self.lookup(path)?;
        match node.to_value() {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "Unreadable state");
                None
            }
        }
    }

    /// Replace the value at `path`.
    ///
    /// `path` must equal or lie below a created namespace. Writing a value
    /// equal to the current one does nothing.
    pub fn set_state(&self, path: &str, value: Value) -> Result<(), StoreError> {
        validate_namespace(path)?;
        let covered = self
            .inner
            .namespaces
            .lock()
            .keys()
            .any(|ns| ns == path || is_descendant(path, ns));
        if !covered {
            return Err(StoreError::NamespaceNotFound {
                namespace: path.to_string(),
            });
        }

        if self.get_state(path).as_ref() == Some(&value) {
            tracing::trace!(path = %path, "Unchanged write ignored");
            return Ok(());
        }

        let before = self.snapshot_related(path);
        self.install(path, value)?;
        self.mark_changed(before);
        Ok(())
    }

    /// Read-modify-write on `path`; `f` sees `Value::Null` when nothing is
    /// stored yet.
    pub fn update_state<F>(&self, path: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(Value) -> Value,
    {
        let current = self.get_state(path).unwrap_or(Value::Null);
        self.set_state(path, f(current))
    }

    /// Call `listener` with the namespace value after each debounced change.
    pub fn subscribe<F>(&self, path: &str, listener: F) -> Result<Subscription, StoreError>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        validate_namespace(path)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut namespaces = self.inner.namespaces.lock();
        let namespace = namespaces
            .get_mut(path)
            .ok_or_else(|| StoreError::NamespaceNotFound {
                namespace: path.to_string(),
            })?;
        namespace.listeners.push((id, Arc::new(listener)));
        Ok(Subscription {
            store: Arc::downgrade(&self.inner),
            namespace: path.to_string(),
            id,
        })
    }

    pub fn listener_count(&self, path: &str) -> usize {
        self.inner
            .namespaces
            .lock()
            .get(path)
            .map_or(0, |ns| ns.listeners.len())
    }

    /// Attach a derive function to `path`, returning its first result.
    ///
    /// The cached value is recomputed before listeners run on every
    /// notification. A second call replaces the first function.
    pub fn derive<F>(&self, path: &str, f: F) -> Result<Value, StoreError>
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        validate_namespace(path)?;
        let f: Deriver = Arc::new(f);
        {
            let mut namespaces = self.inner.namespaces.lock();
            let namespace = namespaces
                .get_mut(path)
                .ok_or_else(|| StoreError::NamespaceNotFound {
                    namespace: path.to_string(),
                })?;
            namespace.derive = Some(Arc::clone(&f));
        }
        let current = self.get_state(path).unwrap_or(Value::Null);
        let derived = f(&current);
        self.inner
            .derived
            .lock()
            .insert(path.to_string(), derived.clone());
        Ok(derived)
    }

    pub fn get_derived(&self, path: &str) -> Option<Value> {
        self.inner.derived.lock().get(path).cloned()
    }

    /// Namespaces waiting for their debounce window to close.
    pub fn pending_namespaces(&self) -> Vec<String> {
        self.inner.pending.lock().keys().cloned().collect()
    }

    /// Earliest moment a pending namespace becomes due, if any is pending.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.pending.lock().values().min().copied()
    }

    /// Persist the whole tree under the configured storage key.
    pub fn save_state(&self) -> Result<(), StoreError> {
        let serialized = self
            .inner
            .state
            .serialize()
            .map_err(StoreError::Serialize)?;
        self.inner
            .storage
            .put(&self.inner.config.storage_key, &serialized)
            .inspect_err(|err| tracing::error!(error = %err, "Failed to save state"))?;
        tracing::debug!(bytes = serialized.len(), "State saved");
        Ok(())
    }

    /// Reload the persisted tree, falling back to the defaults when the
    /// record is corrupt. Namespaces whose value changed are notified.
    pub fn load_state(&self) -> LoadOutcome {
        let before = self.snapshot_all();
        let (root, outcome) = self.restore();
        if matches!(outcome, LoadOutcome::Restored | LoadOutcome::Corrupt) {
            self.inner.state.replace_root(root);
            self.mark_changed(before);
        }
        outcome
    }

    /// Empty the tree, drop every namespace, listener and derived value, and
    /// delete the persisted record.
    pub fn clear_state(&self) {
        self.inner.state.replace_root(Map::new());
        self.inner.namespaces.lock().clear();
        self.inner.derived.lock().clear();
        self.inner.pending.lock().clear();
        if let Err(err) = self.inner.storage.remove(&self.inner.config.storage_key) {
            tracing::warn!(error = %err, "Failed to remove persisted state");
        }
        tracing::info!("Store cleared");
    }

    /// Run every migration newer than the marker under `version_key`, then
    /// save. Returns the resulting version.
    pub fn migrate_state(
        &self,
        migrations: &BTreeMap<u64, Migration>,
        version_key: &str,
    ) -> Result<u64, StoreError> {
        let before = self.snapshot_all();
        let mut root = match self.inner.state.snapshot().map_err(StoreError::Serialize)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let (from, to) = apply_migrations(&mut root, migrations, version_key);
        if from == to {
            tracing::debug!(version = from, "State already at latest version");
            return Ok(to);
        }

        self.inner.state.replace_root(root);
        self.mark_changed(before);
        tracing::info!(from, to, "State migrated");
        self.save_state()?;
        Ok(to)
    }

    /// [`migrate_state`](Self::migrate_state) with the configured
    /// `version_key`.
    pub fn migrate(&self, migrations: &BTreeMap<u64, Migration>) -> Result<u64, StoreError> {
        let version_key = self.inner.config.version_key.clone();
        self.migrate_state(migrations, &version_key)
    }

    fn lookup(&self, path: &str) -> Option<Observed> {
        let mut current = Observed::Map(self.inner.state.root());
        for segment in path.split('.') {
            current = current.as_map()?.get(segment)?;
        }
        Some(current)
    }

    fn install(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let segments: Vec<&str> = path.split('.').collect();
        let Some((leaf, parents)) = segments.split_last() else {
            return Err(StoreError::InvalidNamespace {
                namespace: path.to_string(),
            });
        };

        let mut current: ObservedMap = self.inner.state.root();
        let mut walked = String::new();
        for segment in parents {
            if !walked.is_empty() {
                walked.push('.');
            }
            walked.push_str(segment);
            let next = match current.get(segment) {
                Some(Observed::Map(map)) => map,
                Some(_) => return Err(StoreError::PathConflict { path: walked }),
                None => {
                    let created = self.inner.state.new_map();
                    current.set(*segment, Observed::Map(created.clone()));
                    created
                }
            };
            current = next;
        }
        current.set(*leaf, value);
        Ok(())
    }

    fn snapshot_related(&self, path: &str) -> Vec<(String, Option<Value>)> {
        let related: Vec<String> = self
            .inner
            .namespaces
            .lock()
            .keys()
            .filter(|ns| is_related(ns, path))
            .cloned()
            .collect();
        self.snapshot_of(related)
    }

    fn snapshot_all(&self) -> Vec<(String, Option<Value>)> {
        self.snapshot_of(self.namespaces())
    }

    fn snapshot_of(&self, namespaces: Vec<String>) -> Vec<(String, Option<Value>)> {
        namespaces
            .into_iter()
            .map(|ns| {
                let value = self.get_state(&ns);
                (ns, value)
            })
            .collect()
    }

    /// Mark every namespace in `before` whose value differs now.
    fn mark_changed(&self, before: Vec<(String, Option<Value>)>) {
        let deadline = Instant::now() + self.inner.config.debounce();
        let mut marked = false;
        for (namespace, old) in before {
            if self.get_state(&namespace) != old {
                tracing::trace!(namespace = %namespace, "Namespace marked pending");
                self.inner.pending.lock().insert(namespace, deadline);
                marked = true;
            }
        }
        if marked {
            self.inner.scheduler.enqueue(&self.inner.dispatch);
        }
    }

    fn dispatch(&self) {
        let now = Instant::now();
        let due: Vec<String> = {
            let mut pending = self.inner.pending.lock();
            let due: Vec<String> = pending
                .iter()
                .filter(|(_, deadline)| **deadline <= now)
                .map(|(ns, _)| ns.clone())
                .collect();
            for ns in &due {
                pending.remove(ns);
            }
            due
        };

        for namespace in &due {
            self.notify(namespace);
        }

        if !due.is_empty() && self.inner.config.autosave {
            error::boundary("store.autosave", || self.save_state(), ());
        }

        if !self.inner.pending.lock().is_empty() {
            self.inner.scheduler.enqueue(&self.inner.dispatch);
        }
    }

    fn notify(&self, namespace: &str) {
        let (listeners, deriver): (Vec<Listener>, Option<Deriver>) = {
            let namespaces = self.inner.namespaces.lock();
            let Some(entry) = namespaces.get(namespace) else {
                return;
            };
            (
                entry.listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
                entry.derive.clone(),
            )
        };

        let value = self.get_state(namespace).unwrap_or(Value::Null);
        if let Some(derive) = deriver {
            let mut derived = None;
            match error::guard("store.derive", || derived = Some(derive(&value))) {
                Ok(()) => {
                    if let Some(derived) = derived {
                        self.inner
                            .derived
                            .lock()
                            .insert(namespace.to_string(), derived);
                    }
                }
                Err(failure) => self.inner.scheduler.report_failure(failure),
            }
        }

        tracing::trace!(namespace = %namespace, listeners = listeners.len(), "Notifying namespace");
        for listener in listeners {
            if let Err(failure) = error::guard("store.listener", || listener(&value)) {
                self.inner.scheduler.report_failure(failure);
            }
        }
    }

    fn read_persisted(&self) -> Result<Option<Map<String, Value>>, StoreError> {
        let Some(raw) = self.inner.storage.get(&self.inner.config.storage_key)? else {
            return Ok(None);
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(_) => Err(StoreError::PersistenceCorrupt {
                reason: "root is not an object".to_string(),
            }),
            Err(err) => Err(StoreError::PersistenceCorrupt {
                reason: err.to_string(),
            }),
        }
    }

    /// Persisted tree merged over the defaults, or the defaults alone.
    fn restore(&self) -> (Map<String, Value>, LoadOutcome) {
        let defaults = self.inner.defaults.clone();
        match self.read_persisted() {
            Ok(Some(persisted)) => (deep_merge(defaults, persisted), LoadOutcome::Restored),
            Ok(None) => (defaults, LoadOutcome::Missing),
            Err(err @ StoreError::PersistenceCorrupt { .. }) => {
                tracing::warn!(error = %err, "Persisted state is corrupt, using defaults");
                (defaults, LoadOutcome::Corrupt)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Persisted state unavailable");
                (defaults, LoadOutcome::Unavailable)
            }
        }
    }
}

/// Handle returned by [`Store::subscribe`].
pub struct Subscription {
    store: Weak<StoreInner>,
    namespace: String,
    id: u64,
}

impl Subscription {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Remove the listener. Safe to call more than once, and after the
    /// store is gone.
    pub fn unsubscribe(&self) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        let mut namespaces = store.namespaces.lock();
        if let Some(namespace) = namespaces.get_mut(&self.namespace) {
            namespace.listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualTick;
    use serde_json::json;

    fn store() -> (Store, Scheduler) {
        let scheduler = Scheduler::new(ManualTick::new());
        let config = StoreConfig {
            debounce_ms: 0,
            ..StoreConfig::default()
        };
        (Store::in_memory(scheduler.clone(), config), scheduler)
    }

    #[test]
    fn create_installs_nested_value() {
        let (store, _) = store();
        store.create_namespace("app.user", json!({"name": "ada"})).unwrap();
        assert_eq!(store.get_state("app"), Some(json!({"user": {"name": "ada"}})));
        assert_eq!(store.get_state("app.user.name"), Some(json!("ada")));
        assert_eq!(store.get_state("app.missing"), None);
        assert_eq!(store.get_state("bad..path"), None);
    }

    #[test]
    fn falsy_values_are_readable() {
        let (store, _) = store();
        store
            .create_namespace("flags", json!({"zero": 0, "off": false, "empty": ""}))
            .unwrap();
        assert_eq!(store.get_state("flags.zero"), Some(json!(0)));
        assert_eq!(store.get_state("flags.off"), Some(json!(false)));
        assert_eq!(store.get_state("flags.empty"), Some(json!("")));
    }

    #[test]
    fn set_requires_created_namespace() {
        let (store, _) = store();
        assert!(matches!(
            store.set_state("ghost", json!(1)),
            Err(StoreError::NamespaceNotFound { .. })
        ));
        store.create_namespace("ui", json!({})).unwrap();
        store.set_state("ui.panel.width", json!(300)).unwrap();
        assert_eq!(store.get_state("ui"), Some(json!({"panel": {"width": 300}})));
    }

    #[test]
    fn scalar_blocks_deeper_write() {
        let (store, _) = store();
        store.create_namespace("count", json!(1)).unwrap();
        assert!(matches!(
            store.set_state("count.inner", json!(2)),
            Err(StoreError::PathConflict { .. })
        ));
    }

    #[test]
    fn child_write_notifies_parent_namespace() {
        let (store, scheduler) = store();
        store.create_namespace("user", json!({"name": "ada"})).unwrap();
        store.create_namespace("user.prefs", json!({"dark": false})).unwrap();
        scheduler.flush();

        let seen = Arc::new(Mutex::new(Vec::new()));
        for ns in ["user", "user.prefs"] {
            let log = Arc::clone(&seen);
            store
                .subscribe(ns, move |_| log.lock().push(ns))
                .unwrap();
        }

        store.set_state("user.prefs.dark", json!(true)).unwrap();
        scheduler.flush();
        assert_eq!(*seen.lock(), vec!["user", "user.prefs"]);

        seen.lock().clear();
        store.set_state("user.name", json!("grace")).unwrap();
        scheduler.flush();
        assert_eq!(*seen.lock(), vec!["user"]);
    }

    #[test]
    fn derive_tracks_changes() {
        let (store, scheduler) = store();
        store.create_namespace("items", json!([1, 2])).unwrap();
        let first = store
            .derive("items", |v| json!(v.as_array().map_or(0, Vec::len)))
            .unwrap();
        assert_eq!(first, json!(2));

        store.set_state("items", json!([1, 2, 3])).unwrap();
        assert_eq!(store.get_derived("items"), Some(json!(2)));
        scheduler.flush();
        assert_eq!(store.get_derived("items"), Some(json!(3)));
        assert_eq!(store.get_derived("other"), None);
    }

    #[test]
    fn update_state_reads_then_writes() {
        let (store, _) = store();
        store.create_namespace("counter", json!(1)).unwrap();
        store
            .update_state("counter", |v| json!(v.as_i64().unwrap_or(0) + 1))
            .unwrap();
        assert_eq!(store.get_state("counter"), Some(json!(2)));
    }

    #[test]
    fn unsubscribe_while_store_alive() {
        let (store, scheduler) = store();
        store.create_namespace("x", json!(1)).unwrap();
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        let sub = store.subscribe("x", move |_| *counter.lock() += 1).unwrap();
        store.subscribe("x", |_| {}).unwrap();

        sub.unsubscribe();
        assert_eq!(store.listener_count("x"), 1);
        store.set_state("x", json!(2)).unwrap();
        scheduler.flush();
        assert_eq!(*hits.lock(), 0);
    }

    #[test]
    fn next_deadline_tracks_pending_namespaces() {
        let scheduler = Scheduler::new(ManualTick::new());
        let config = StoreConfig {
            debounce_ms: 40,
            ..StoreConfig::default()
        };
        let store = Store::in_memory(scheduler, config);
        store.create_namespace("x", json!(1)).unwrap();
        assert_eq!(store.next_deadline(), None);

        let before = Instant::now();
        store.set_state("x", json!(2)).unwrap();
        let deadline = store.next_deadline().unwrap();
        assert!(deadline >= before + std::time::Duration::from_millis(40));
    }

    #[test]
    fn migrate_uses_configured_version_key() {
        let scheduler = Scheduler::new(ManualTick::new());
        let config = StoreConfig {
            version_key: "schema".to_string(),
            ..StoreConfig::default()
        };
        let store = Store::in_memory(scheduler, config);
        let mut migrations: BTreeMap<u64, Migration> = BTreeMap::new();
        migrations.insert(
            1,
            crate::store::migration(|root| {
                root.insert("seeded".into(), json!(true));
            }),
        );

        assert_eq!(store.migrate(&migrations).unwrap(), 1);
        assert_eq!(store.get_state("schema"), Some(json!(1)));
        assert_eq!(store.get_state("__version"), None);
        assert_eq!(store.get_state("seeded"), Some(json!(true)));
    }

    #[test]
    fn listener_failures_reach_flush_report() {
        let (store, scheduler) = store();
        store.create_namespace("x", json!(1)).unwrap();
        store.derive("x", |v| v.clone()).unwrap();
        scheduler.flush();
        store.subscribe("x", |_| panic!("listener failed")).unwrap();

        store.set_state("x", json!(2)).unwrap();
        let report = scheduler.flush();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].context, "store.listener");
        assert_eq!(store.get_derived("x"), Some(json!(2)));
    }

    #[test]
    fn subscription_outliving_store_is_harmless() {
        let (store, _) = store();
        store.create_namespace("x", json!(1)).unwrap();
        let sub = store.subscribe("x", |_| {}).unwrap();
        assert_eq!(sub.namespace(), "x");
        drop(store);
        sub.unsubscribe();
    }
}
