//! Versioned, forward-only transforms of persisted state.

use std::collections::BTreeMap;
use std::ops::Bound;

use serde_json::{Map, Value};

/// Mutates the whole state tree in place.
pub type Migration = Box<dyn Fn(&mut Map<String, Value>) + Send + Sync>;

/// Box a closure as a [`Migration`].
pub fn migration(f: impl Fn(&mut Map<String, Value>) + Send + Sync + 'static) -> Migration {
    Box::new(f)
}

/// Version recorded under `version_key`; absent or unreadable means 0.
///
/// Numeric strings are accepted for records written by older clients.
pub fn stored_version(root: &Map<String, Value>, version_key: &str) -> u64 {
    root.get(version_key)
        .and_then(|v| v.as_u64().or_else(|| v.as_str()?.parse().ok()))
        .unwrap_or(0)
}

/// Apply every migration newer than the stored version, in ascending
/// order, bumping the marker after each one. Returns `(from, to)`.
pub fn apply_migrations(
    root: &mut Map<String, Value>,
    migrations: &BTreeMap<u64, Migration>,
    version_key: &str,
) -> (u64, u64) {
    let from = stored_version(root, version_key);
    let mut to = from;
    for (&version, migrate) in migrations.range((Bound::Excluded(from), Bound::Unbounded)) {
        migrate(root);
        root.insert(version_key.to_string(), Value::from(version));
        tracing::info!(version, "Applied state migration");
        to = version;
    }
    (from, to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn applies_pending_migrations_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut migrations = BTreeMap::new();
        for version in [2u64, 1, 3] {
            let order = Arc::clone(&order);
            migrations.insert(
                version,
                migration(move |root| {
                    order.lock().unwrap().push(version);
                    root.insert(format!("v{version}"), json!(true));
                }),
            );
        }

        let mut root = object(json!({"__version": 1}));
        let (from, to) = apply_migrations(&mut root, &migrations, "__version");
        assert_eq!((from, to), (1, 3));
        assert_eq!(*order.lock().unwrap(), vec![2, 3]);
        assert_eq!(root.get("__version"), Some(&json!(3)));
        assert!(!root.contains_key("v1"));
    }

    #[test]
    fn current_state_is_left_alone() {
        let mut migrations = BTreeMap::new();
        migrations.insert(1, migration(|root| root.clear()));
        let mut root = object(json!({"__version": 4, "data": 1}));
        assert_eq!(apply_migrations(&mut root, &migrations, "__version"), (4, 4));
        assert_eq!(root.get("data"), Some(&json!(1)));
    }

    #[test]
    fn legacy_string_versions_are_read() {
        let root = object(json!({"v": "2"}));
        assert_eq!(stored_version(&root, "v"), 2);
        let root = object(json!({"v": "garbage"}));
        assert_eq!(stored_version(&root, "v"), 0);
    }
}
