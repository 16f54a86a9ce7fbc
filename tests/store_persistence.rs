mod common;

use common::{instant_config, manual_scheduler, record, store_over};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;
use weft::config::StoreConfig;
use weft::store::{
    migration, FileStorage, KvStorage, LoadOutcome, MemoryStorage, Migration, Store, StoreError,
};

fn persisted(storage: &MemoryStorage, key: &str) -> Value {
    let raw = storage.get(key).unwrap().expect("record written");
    serde_json::from_str(&raw).unwrap()
}

/// Test that persisted state is merged over defaults on open.
#[test]
fn test_open_merges_persisted_over_defaults() {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .put("storeState", r#"{"ui": {"theme": "dark"}, "extra": 1}"#)
        .unwrap();

    let (store, _) = store_over(
        Arc::clone(&storage),
        instant_config(),
        json!({"ui": {"theme": "light", "size": 12}}),
    );
    assert_eq!(
        store.get_state("ui"),
        Some(json!({"theme": "dark", "size": 12}))
    );
    assert_eq!(store.get_state("extra"), Some(json!(1)));
}

/// Test that a restored value wins over the namespace's initial value.
#[test]
fn test_restored_namespace_keeps_value() {
    let storage = Arc::new(MemoryStorage::new());
    storage.put("storeState", r#"{"user": {"name": "ada"}}"#).unwrap();
    let (store, _) = store_over(storage, instant_config(), Value::Null);

    store
        .create_namespace("user", json!({"name": "default"}))
        .unwrap();
    assert!(store.has_namespace("user"));
    assert_eq!(store.get_state("user.name"), Some(json!("ada")));
}

/// Test that corrupt data degrades to the defaults.
#[test]
fn test_corrupt_record_falls_back_to_defaults() {
    let storage = Arc::new(MemoryStorage::new());
    storage.put("storeState", "{not json").unwrap();
    let (store, _) = store_over(Arc::clone(&storage), instant_config(), json!({"a": 1}));

    assert_eq!(store.get_state("a"), Some(json!(1)));
    assert_eq!(store.load_state(), LoadOutcome::Corrupt);

    storage.put("storeState", "[1, 2]").unwrap();
    assert_eq!(store.load_state(), LoadOutcome::Corrupt);
}

/// Test save then load on a second store.
#[test]
fn test_save_and_reload() {
    let storage = Arc::new(MemoryStorage::new());
    let (store, _) = store_over(Arc::clone(&storage), instant_config(), Value::Null);
    store
        .create_namespace("todos", json!([{"title": "write", "done": false}]))
        .unwrap();
    store.save_state().unwrap();

    let (reopened, _) = store_over(storage, instant_config(), Value::Null);
    assert_eq!(
        reopened.get_state("todos"),
        Some(json!([{"title": "write", "done": false}]))
    );
}

/// Test that load_state notifies namespaces whose value changed.
#[test]
fn test_load_state_notifies_changed_namespaces() {
    let storage = Arc::new(MemoryStorage::new());
    let (store, scheduler) = store_over(Arc::clone(&storage), instant_config(), Value::Null);
    store.create_namespace("count", json!(1)).unwrap();
    store.create_namespace("name", json!("x")).unwrap();
    let counts = record(&store, "count");
    let names = record(&store, "name");

    storage
        .put("storeState", r#"{"count": 5, "name": "x"}"#)
        .unwrap();
    assert_eq!(store.load_state(), LoadOutcome::Restored);
    scheduler.flush();

    assert_eq!(*counts.lock(), vec![json!(5)]);
    assert!(names.lock().is_empty());
}

/// Test that a missing record leaves the state alone.
#[test]
fn test_load_missing_record() {
    let storage = Arc::new(MemoryStorage::new());
    let (store, _) = store_over(storage, instant_config(), Value::Null);
    store.create_namespace("n", json!(3)).unwrap();
    assert_eq!(store.load_state(), LoadOutcome::Missing);
    assert_eq!(store.get_state("n"), Some(json!(3)));
}

/// Test that clear_state forgets namespaces and the persisted record.
#[test]
fn test_clear_state() {
    let storage = Arc::new(MemoryStorage::new());
    let (store, _) = store_over(Arc::clone(&storage), instant_config(), Value::Null);
    store.create_namespace("n", json!(1)).unwrap();
    store.derive("n", |v| v.clone()).unwrap();
    store.save_state().unwrap();

    store.clear_state();
    assert!(storage.is_empty());
    assert!(store.namespaces().is_empty());
    assert_eq!(store.get_state("n"), None);
    assert_eq!(store.get_derived("n"), None);
    assert!(matches!(
        store.set_state("n", json!(2)),
        Err(StoreError::NamespaceNotFound { .. })
    ));
}

/// Test that migrations run in order from an unversioned tree and the
/// result is saved.
#[test]
fn test_migrations_from_version_zero() {
    let storage = Arc::new(MemoryStorage::new());
    let (store, _) = store_over(Arc::clone(&storage), instant_config(), Value::Null);
    store.create_namespace("user", json!({"name": "ada"})).unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut migrations: BTreeMap<u64, Migration> = BTreeMap::new();
    let first = Arc::clone(&order);
    migrations.insert(
        1,
        migration(move |root| {
            first.lock().push(1);
            if let Some(user) = root.get_mut("user").and_then(Value::as_object_mut) {
                user.insert("role".into(), json!("admin"));
            }
        }),
    );
    let second = Arc::clone(&order);
    migrations.insert(
        2,
        migration(move |root| {
            second.lock().push(2);
            root.insert("settings".into(), json!({}));
        }),
    );

    assert_eq!(store.migrate_state(&migrations, "__version").unwrap(), 2);
    assert_eq!(*order.lock(), vec![1, 2]);
    assert_eq!(store.get_state("__version"), Some(json!(2)));
    assert_eq!(store.get_state("user.role"), Some(json!("admin")));

    let saved = persisted(&storage, "storeState");
    assert_eq!(saved["__version"], json!(2));

    // Running again is a no-op.
    assert_eq!(store.migrate_state(&migrations, "__version").unwrap(), 2);
    assert_eq!(order.lock().len(), 2);
}

/// Test that the configured version key names the migration marker.
#[test]
fn test_migrate_with_configured_version_key() {
    let storage = Arc::new(MemoryStorage::new());
    storage.put("storeState", r#"{"schema": 1, "n": 1}"#).unwrap();
    let config = StoreConfig {
        version_key: "schema".to_string(),
        ..instant_config()
    };
    let (store, _) = store_over(Arc::clone(&storage), config, Value::Null);

    let mut migrations: BTreeMap<u64, Migration> = BTreeMap::new();
    migrations.insert(
        1,
        migration(|root| {
            root.insert("n".into(), json!(100));
        }),
    );
    migrations.insert(
        2,
        migration(|root| {
            let doubled = root.get("n").and_then(Value::as_i64).unwrap_or(0) * 2;
            root.insert("n".into(), json!(doubled));
        }),
    );

    assert_eq!(store.migrate(&migrations).unwrap(), 2);
    assert_eq!(store.get_state("n"), Some(json!(2)));
    assert_eq!(persisted(&storage, "storeState")["schema"], json!(2));
    assert_eq!(store.get_state("__version"), None);
}

/// Test that autosave writes after each notification dispatch.
#[test]
fn test_autosave_after_dispatch() {
    let storage = Arc::new(MemoryStorage::new());
    let config = StoreConfig {
        autosave: true,
        ..instant_config()
    };
    let (store, scheduler) = store_over(Arc::clone(&storage), config, Value::Null);
    store.create_namespace("n", json!(1)).unwrap();
    assert!(storage.is_empty());

    store.set_state("n", json!(2)).unwrap();
    scheduler.flush();
    assert_eq!(persisted(&storage, "storeState"), json!({"n": 2}));
}

/// Test that file storage carries state across store instances.
#[test]
fn test_file_storage_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let config = StoreConfig {
        storage_key: "app-state".to_string(),
        ..instant_config()
    };

    let (scheduler, _) = manual_scheduler();
    let storage = Arc::new(FileStorage::new(temp_dir.path()));
    let store = Store::open(scheduler, storage, config.clone(), Value::Null);
    store.create_namespace("ui.sidebar", json!({"open": true})).unwrap();
    store.save_state().unwrap();
    assert!(temp_dir.path().join("app-state.json").exists());

    let (scheduler, _) = manual_scheduler();
    let reopened = Store::open(
        scheduler,
        Arc::new(FileStorage::new(temp_dir.path())),
        config,
        Value::Null,
    );
    assert_eq!(reopened.get_state("ui.sidebar.open"), Some(json!(true)));
}
