//! Observable application state.
//!
//! State is a tree of [`ObservedMap`] / [`ObservedList`] handles with scalar
//! leaves. Every compound value is wrapped exactly once, when it is stored;
//! reading it back returns the same handle, and storing an existing handle
//! keeps it as-is. Writes that change a value report `(property, value)` to
//! the tree's change sink, which [`ObservableState`] routes through the
//! [`Scheduler`](crate::scheduler::Scheduler).

mod observable;
mod observed;

pub use observable::{ObservableState, StateSubscription};
pub use observed::{ChangeSink, IntoObserved, Observed, ObservedList, ObservedMap};

use thiserror::Error;

/// Errors from serializing or hydrating state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("State contains a cyclic reference and cannot be serialized")]
    Cyclic,

    #[error("Failed to parse serialized state: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Serialized state root must be a JSON object")]
    RootNotObject,
}
