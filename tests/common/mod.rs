//! Shared test utilities.

#![allow(dead_code, unused_imports)]

use parking_lot::Mutex;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use weft::config::StoreConfig;
use weft::scheduler::{ManualTick, Scheduler};
use weft::store::{KvStorage, MemoryStorage, Store};
use weft::vtree::{Child, TreeNode};

/// Store config that notifies on the first flush after a write.
pub fn instant_config() -> StoreConfig {
    StoreConfig {
        debounce_ms: 0,
        ..StoreConfig::default()
    }
}

/// Scheduler driven by hand, plus its tick for inspecting requests.
pub fn manual_scheduler() -> (Scheduler, ManualTick) {
    let tick = ManualTick::new();
    (Scheduler::new(tick.clone()), tick)
}

/// In-memory store with no debounce.
pub fn memory_store() -> (Store, Scheduler) {
    let (scheduler, _) = manual_scheduler();
    (Store::in_memory(scheduler.clone(), instant_config()), scheduler)
}

/// Store over shared storage, so tests can inspect what was written.
pub fn store_over(
    storage: Arc<MemoryStorage>,
    config: StoreConfig,
    defaults: Value,
) -> (Store, Scheduler) {
    let (scheduler, _) = manual_scheduler();
    let store = Store::open(scheduler.clone(), storage, config, defaults);
    (store, scheduler)
}

/// Record every value delivered to listeners of `namespace`.
pub fn record(store: &Store, namespace: &str) -> Arc<Mutex<Vec<Value>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    store
        .subscribe(namespace, move |value| log.lock().push(value.clone()))
        .expect("namespace must exist");
    seen
}

/// `<ul>` of keyed `<li>` items whose text is the key.
pub fn keyed_list(keys: &[&str]) -> Child {
    TreeNode::new("ul")
        .children(keys.iter().map(|k| TreeNode::new("li").key(*k).text(*k)))
        .into()
}

/// Write `content` to a `config.toml` inside a fresh temp dir.
pub fn temp_config(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, content).expect("Failed to write config");
    (temp_dir, config_path)
}
