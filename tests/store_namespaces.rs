mod common;

use common::{manual_scheduler, memory_store, record};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use weft::config::StoreConfig;
use weft::store::{Store, StoreError};

/// Test that writes inside one debounce window reach listeners once, with
/// the final value.
#[test]
fn test_debounced_writes_deliver_final_value_once() {
    let (scheduler, _) = manual_scheduler();
    let config = StoreConfig {
        debounce_ms: 30,
        ..StoreConfig::default()
    };
    let store = Store::in_memory(scheduler.clone(), config);
    store.create_namespace("n", json!(0)).unwrap();
    let seen = record(&store, "n");

    for value in 1..=3 {
        store.set_state("n", json!(value)).unwrap();
    }
    scheduler.flush();
    assert!(seen.lock().is_empty(), "window still open");
    assert_eq!(store.pending_namespaces(), vec!["n".to_string()]);

    std::thread::sleep(Duration::from_millis(60));
    scheduler.flush();
    assert_eq!(*seen.lock(), vec![json!(3)]);
    assert!(store.pending_namespaces().is_empty());
}

/// Test that an unsubscribed listener is not called.
#[test]
fn test_unsubscribe_before_write() {
    let (store, scheduler) = memory_store();
    store.create_namespace("user", json!({"name": "ada"})).unwrap();

    let hits = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&hits);
    let subscription = store
        .subscribe("user", move |_| *counter.lock() += 1)
        .unwrap();
    subscription.unsubscribe();
    subscription.unsubscribe();

    store.set_state("user.name", json!("grace")).unwrap();
    scheduler.flush();
    assert_eq!(*hits.lock(), 0);
    assert_eq!(store.listener_count("user"), 0);
}

/// Test that creating a namespace twice keeps the first value.
#[test]
fn test_create_namespace_twice() {
    let (store, _) = memory_store();
    store.create_namespace("x", json!({"n": 1})).unwrap();
    let second = store.create_namespace("x", json!({"n": 2}));
    assert!(matches!(second, Err(StoreError::NamespaceExists { .. })));
    assert_eq!(store.get_state("x"), Some(json!({"n": 1})));
}

/// Test that writing an equal value notifies nobody.
#[test]
fn test_deep_equal_write_is_silent() {
    let (store, scheduler) = memory_store();
    store
        .create_namespace("prefs", json!({"theme": {"dark": true}, "size": [1, 2]}))
        .unwrap();
    scheduler.flush();
    let seen = record(&store, "prefs");

    store
        .set_state("prefs", json!({"size": [1, 2], "theme": {"dark": true}}))
        .unwrap();
    assert_eq!(scheduler.pending_len(), 0);
    scheduler.flush();
    assert!(seen.lock().is_empty());
}

/// Test that unknown and malformed namespaces are rejected.
#[test]
fn test_namespace_errors() {
    let (store, _) = memory_store();
    assert!(matches!(
        store.subscribe("missing", |_| {}),
        Err(StoreError::NamespaceNotFound { .. })
    ));
    assert!(matches!(
        store.set_state("missing", json!(1)),
        Err(StoreError::NamespaceNotFound { .. })
    ));
    assert!(matches!(
        store.create_namespace("bad-name", json!(1)),
        Err(StoreError::InvalidNamespace { .. })
    ));
    assert!(matches!(
        store.derive("missing", |v| v.clone()),
        Err(StoreError::NamespaceNotFound { .. })
    ));
}

/// Test that listeners run in subscription order and a panicking one does
/// not stop the rest.
#[test]
fn test_listener_order_and_isolation() {
    let (store, scheduler) = memory_store();
    store.create_namespace("n", json!(0)).unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let first = Arc::clone(&order);
    store.subscribe("n", move |_| first.lock().push("first")).unwrap();
    store.subscribe("n", |_| panic!("listener failed")).unwrap();
    let third = Arc::clone(&order);
    store.subscribe("n", move |_| third.lock().push("third")).unwrap();

    store.set_state("n", json!(1)).unwrap();
    let report = scheduler.flush();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].context, "store.listener");
    assert_eq!(report.failures[0].message, "listener failed");
    assert_eq!(*order.lock(), vec!["first", "third"]);
}

/// Test that a derived value is recomputed on each notification.
#[test]
fn test_derived_value_follows_namespace() {
    let (store, scheduler) = memory_store();
    store
        .create_namespace("cart", json!({"items": [{"price": 2}, {"price": 3}]}))
        .unwrap();
    let total = |cart: &serde_json::Value| {
        let sum: i64 = cart["items"]
            .as_array()
            .map(|items| items.iter().filter_map(|i| i["price"].as_i64()).sum())
            .unwrap_or(0);
        json!(sum)
    };
    assert_eq!(store.derive("cart", total).unwrap(), json!(5));

    store
        .update_state("cart.items", |items| {
            let mut items = items.as_array().cloned().unwrap_or_default();
            items.push(json!({"price": 10}));
            json!(items)
        })
        .unwrap();
    scheduler.flush();
    assert_eq!(store.get_derived("cart"), Some(json!(15)));
}

/// Test that a listener writing to the store is delivered on the next flush.
#[test]
fn test_listener_write_defers_to_next_flush() {
    let (store, scheduler) = memory_store();
    store.create_namespace("a", json!(0)).unwrap();
    store.create_namespace("b", json!(0)).unwrap();

    let writer = store.clone();
    store
        .subscribe("a", move |value| {
            writer.set_state("b", value.clone()).unwrap();
        })
        .unwrap();
    let seen_b = record(&store, "b");

    store.set_state("a", json!(7)).unwrap();
    scheduler.flush();
    assert!(seen_b.lock().is_empty());
    assert!(scheduler.is_armed());

    scheduler.flush();
    assert_eq!(*seen_b.lock(), vec![json!(7)]);
}

/// Test that a subscription removed while the store is alive stops its
/// listener and leaves the others.
#[test]
fn test_unsubscribe_keeps_other_listeners() {
    let (store, scheduler) = memory_store();
    store.create_namespace("n", json!(0)).unwrap();
    let kept = record(&store, "n");
    let dropped = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&dropped);
    let subscription = store
        .subscribe("n", move |_| *counter.lock() += 1)
        .unwrap();

    assert_eq!(subscription.namespace(), "n");
    subscription.unsubscribe();
    store.set_state("n", json!(1)).unwrap();
    scheduler.flush();

    assert_eq!(*dropped.lock(), 0);
    assert_eq!(*kept.lock(), vec![json!(1)]);
    assert_eq!(store.listener_count("n"), 1);
}

/// Test that the scoped context is reachable from the store.
#[test]
fn test_store_context() {
    let (store, _) = memory_store();
    store.context().set("form.step", json!(2));
    store.context().set("other", json!(true));
    assert_eq!(store.context().scoped("form").len(), 1);
    assert!(store.context().has("other"));
}
