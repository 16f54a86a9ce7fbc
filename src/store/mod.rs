//! Namespaced, persisted application state.
//!
//! A [`Store`] wraps one [`ObservableState`](crate::state::ObservableState)
//! tree. Namespaces are dot paths (`user.profile`) that must be created
//! before they can be written or subscribed to. Listener delivery is
//! debounced per namespace and always goes through the scheduler.
//!
//! Persistence is a single JSON record behind the [`KvStorage`] trait;
//! [`MemoryStorage`] and [`FileStorage`] are provided.

mod context;
mod migrate;
mod namespaced;
mod path;
mod persist;

use thiserror::Error;

use crate::state::StateError;

pub use context::Context;
pub use migrate::{apply_migrations, migration, stored_version, Migration};
pub use namespaced::{Listener, LoadOutcome, Store, Subscription};
pub use path::{deep_merge, validate_namespace};
pub use persist::{is_valid_key as is_valid_storage_key, FileStorage, KvStorage, MemoryStorage, StorageError};

/// Errors returned by [`Store`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Namespace '{namespace}' already exists")]
    NamespaceExists { namespace: String },

    #[error("Namespace '{namespace}' not found")]
    NamespaceNotFound { namespace: String },

    #[error("Invalid namespace '{namespace}': expected dot-separated segments of letters, digits and '_'")]
    InvalidNamespace { namespace: String },

    #[error("Path '{path}' holds a value that is not a mapping")]
    PathConflict { path: String },

    #[error("Persisted state is corrupt: {reason}")]
    PersistenceCorrupt { reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Failed to serialize state: {0}")]
    Serialize(#[source] StateError),
}
