//! Virtual tree model and reconciler.
//!
//! A render produces a [`TreeNode`]; [`diff`] compares it with the tree that
//! was applied last and yields a [`Patch`], and [`apply_patch`] replays that
//! patch against any [`LiveTree`]. Children are matched by key where one is
//! given and by position otherwise; reordering is expressed with the fewest
//! moves (longest increasing subsequence of reused positions).
//!
//! [`Root`] keeps the applied tree between renders. [`MemoryTree`] is a
//! headless live tree with operation counters and markup output.

mod diff;
mod memory;
mod node;
mod patch;
mod root;

use thiserror::Error;

pub use diff::{diff, match_children, stable_positions, ChildPatch, Patch, PropPatch};
pub use memory::{MemoryTree, OpStats};
pub use node::{Child, Handle, Handler, Key, PropValue, TextNode, TreeNode};
pub use patch::{apply_patch, materialize, LiveTree};
pub use root::Root;

/// Errors raised while applying a patch to a live tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("Node '{label}' has no live handle")]
    Unmaterialized { label: String },

    #[error("No child at index {index} under {parent}")]
    MissingChild { parent: Handle, index: usize },

    #[error("Handle {handle} does not refer to a live node")]
    DanglingHandle { handle: Handle },

    #[error("{child} is not a child of {parent}")]
    NotAChild { parent: Handle, child: Handle },

    #[error("{handle} is not an element")]
    NotAnElement { handle: Handle },

    #[error("{handle} is not a text node")]
    NotText { handle: Handle },
}
