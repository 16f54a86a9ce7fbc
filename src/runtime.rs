//! Views bound to store namespaces.
//!
//! A mounted view renders once immediately and again whenever one of its
//! namespaces is notified. Notifications arrive through the store's
//! dispatch task, so re-renders always happen inside a scheduler flush.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

use crate::error;
use crate::events::EventBus;
use crate::scheduler::{FlushReport, Scheduler};
use crate::store::{Store, StoreError, Subscription};
use crate::vtree::{Handle, LiveTree, MemoryTree, ReconcileError, Root, TreeNode};

/// Builds a view's tree from the current store contents.
pub type RenderFn = Arc<dyn Fn(&Store) -> TreeNode + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(u64);

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view-{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("Unknown view {id}")]
    UnknownView { id: ViewId },
}

struct View {
    root: Root,
    render: RenderFn,
    namespaces: Vec<String>,
    subscriptions: Vec<Subscription>,
}

/// Mounted views keyed by id. Entries leave the registry on unmount.
#[derive(Default)]
struct ViewRegistry {
    views: BTreeMap<ViewId, View>,
}

/// One scheduler, one store, one event bus and the views rendered into a
/// live tree. Cloning shares everything.
pub struct Runtime<L: LiveTree + Send + 'static = MemoryTree> {
    inner: Arc<RuntimeInner<L>>,
}

impl<L: LiveTree + Send + 'static> Clone for Runtime<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct RuntimeInner<L> {
    store: Store,
    bus: EventBus,
    registry: Mutex<ViewRegistry>,
    live: Mutex<L>,
    next_view: AtomicU64,
}

impl Runtime<MemoryTree> {
    /// Runtime rendering into a fresh [`MemoryTree`].
    pub fn headless(store: Store) -> Self {
        Self::new(store, MemoryTree::new())
    }

    /// Invoke the `on<event>` handler of `node`, outside every lock.
    pub fn fire(&self, node: Handle, event: &str) -> bool {
        let handler = self.inner.live.lock().handler(node, event);
        match handler {
            Some(handler) => {
                let _ = error::guard("runtime.handler", || handler.call());
                true
            }
            None => false,
        }
    }
}

impl<L: LiveTree + Send + 'static> Runtime<L> {
    pub fn new(store: Store, live: L) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                store,
                bus: EventBus::new(),
                registry: Mutex::new(ViewRegistry::default()),
                live: Mutex::new(live),
                next_view: AtomicU64::new(1),
            }),
        }
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        self.inner.store.scheduler()
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Lock the live tree. Do not hold the guard across a flush.
    pub fn live(&self) -> MutexGuard<'_, L> {
        self.inner.live.lock()
    }

    /// Render `render` into `parent` now and again whenever one of
    /// `namespaces` changes.
    pub fn mount<F>(&self, parent: Handle, namespaces: &[&str], render: F) -> Result<ViewId, RuntimeError>
    where
        F: Fn(&Store) -> TreeNode + Send + Sync + 'static,
    {
        let store = &self.inner.store;
        if let Some(missing) = namespaces.iter().find(|ns| !store.has_namespace(ns)) {
            return Err(StoreError::NamespaceNotFound {
                namespace: missing.to_string(),
            }
            .into());
        }

        let id = ViewId(self.inner.next_view.fetch_add(1, Ordering::Relaxed));
        let render: RenderFn = Arc::new(render);
        let tree = render(store);
        let mut root = Root::new(parent);
        root.render(&mut *self.inner.live.lock(), Some(tree.into()))?;

        let mut subscriptions = Vec::with_capacity(namespaces.len());
        for namespace in namespaces {
            let weak: Weak<RuntimeInner<L>> = Arc::downgrade(&self.inner);
            subscriptions.push(store.subscribe(namespace, move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.rerender(id);
                }
            })?);
        }

        self.inner.registry.lock().views.insert(
            id,
            View {
                root,
                render,
                namespaces: namespaces.iter().map(|ns| ns.to_string()).collect(),
                subscriptions,
            },
        );
        tracing::debug!(view = %id, parent = %parent, namespaces = ?namespaces, "View mounted");
        Ok(id)
    }

    /// Unsubscribe the view, remove what it rendered and forget it.
    pub fn unmount(&self, id: ViewId) -> Result<(), RuntimeError> {
        let view = self
            .inner
            .registry
            .lock()
            .views
            .remove(&id)
            .ok_or(RuntimeError::UnknownView { id })?;
        for subscription in &view.subscriptions {
            subscription.unsubscribe();
        }
        let mut root = view.root;
        root.clear(&mut *self.inner.live.lock())?;
        tracing::debug!(view = %id, "View unmounted");
        Ok(())
    }

    /// Render `id` against the current store contents right away.
    pub fn refresh(&self, id: ViewId) -> Result<bool, RuntimeError> {
        self.inner.render_view(id)
    }

    pub fn views(&self) -> Vec<ViewId> {
        self.inner.registry.lock().views.keys().copied().collect()
    }

    /// Namespaces `id` re-renders on.
    pub fn watched(&self, id: ViewId) -> Option<Vec<String>> {
        self.inner
            .registry
            .lock()
            .views
            .get(&id)
            .map(|view| view.namespaces.clone())
    }

    /// Handle of the top element `id` rendered, if any.
    pub fn view_handle(&self, id: ViewId) -> Option<Handle> {
        self.inner
            .registry
            .lock()
            .views
            .get(&id)
            .and_then(|view| view.root.current().and_then(|tree| tree.handle()))
    }

    /// Pump one frame.
    pub fn flush(&self) -> FlushReport {
        self.scheduler().flush()
    }

    /// Pump frames until nothing is pending, at most `max_frames` of them.
    ///
    /// Before each frame the calling thread sleeps until the earliest store
    /// debounce deadline, so every frame either delivers a notification or
    /// runs other queued work. Meant for headless drivers; do not call it
    /// from an async task.
    pub fn settle(&self, max_frames: usize) -> FlushReport {
        let mut total = FlushReport::default();
        for _ in 0..max_frames {
            if let Some(deadline) = self.store().next_deadline() {
                let wait = deadline.saturating_duration_since(Instant::now());
                if !wait.is_zero() {
                    std::thread::sleep(wait);
                }
            }
            let report = self.flush();
            if report.is_empty() {
                break;
            }
            total.ran += report.ran;
            total.failures.extend(report.failures);
        }
        total
    }
}

impl<L: LiveTree + Send + 'static> RuntimeInner<L> {
    fn rerender(&self, id: ViewId) {
        if let Err(err) = self.render_view(id) {
            tracing::error!(view = %id, error = %err, "View render failed");
        }
    }

    fn render_view(&self, id: ViewId) -> Result<bool, RuntimeError> {
        let render = self
            .registry
            .lock()
            .views
            .get(&id)
            .map(|view| Arc::clone(&view.render))
            .ok_or(RuntimeError::UnknownView { id })?;

        // User code runs without any runtime lock held.
        let tree = render(&self.store);

        let mut registry = self.registry.lock();
        let Some(view) = registry.views.get_mut(&id) else {
            return Ok(false);
        };
        let changed = view.root.render(&mut *self.live.lock(), Some(tree.into()))?;
        tracing::trace!(view = %id, changed, "View rendered");
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::scheduler::ManualTick;
    use serde_json::json;

    fn runtime() -> Runtime {
        let scheduler = Scheduler::new(ManualTick::new());
        let config = StoreConfig {
            debounce_ms: 0,
            ..StoreConfig::default()
        };
        Runtime::headless(Store::in_memory(scheduler, config))
    }

    fn label(store: &Store) -> TreeNode {
        let name = store
            .get_state("user.name")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        TreeNode::new("span").text(name)
    }

    #[test]
    fn mount_renders_immediately() {
        let rt = runtime();
        rt.store().create_namespace("user", json!({"name": "ada"})).unwrap();
        let root = rt.live().root();
        let id = rt.mount(root, &["user"], label).unwrap();
        assert_eq!(rt.live().root_markup(), "<span>ada</span>");
        assert_eq!(rt.watched(id), Some(vec!["user".to_string()]));
        assert!(rt.view_handle(id).is_some());
    }

    #[test]
    fn mount_requires_namespaces() {
        let rt = runtime();
        let root = rt.live().root();
        assert!(matches!(
            rt.mount(root, &["ghost"], label),
            Err(RuntimeError::Store(StoreError::NamespaceNotFound { .. }))
        ));
        assert!(rt.live().root_markup().is_empty());
    }

    #[test]
    fn settle_waits_out_the_debounce() {
        let scheduler = Scheduler::new(ManualTick::new());
        let config = StoreConfig {
            debounce_ms: 30,
            ..StoreConfig::default()
        };
        let rt = Runtime::headless(Store::in_memory(scheduler, config));
        rt.store().create_namespace("user", json!({"name": "ada"})).unwrap();
        let root = rt.live().root();
        rt.mount(root, &["user"], label).unwrap();

        let started = Instant::now();
        rt.store().set_state("user.name", json!("grace")).unwrap();
        let report = rt.settle(1000);

        assert!(started.elapsed() >= std::time::Duration::from_millis(30));
        assert!(report.ran < 10, "ran {} frames", report.ran);
        assert!(rt.store().pending_namespaces().is_empty());
        assert_eq!(rt.live().root_markup(), "<span>grace</span>");
    }

    #[test]
    fn unknown_view_unmount_fails() {
        let rt = runtime();
        assert!(matches!(
            rt.unmount(ViewId(42)),
            Err(RuntimeError::UnknownView { .. })
        ));
    }
}
