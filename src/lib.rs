//! Reactive state, frame-aligned scheduling and virtual-tree reconciliation.
//!
//! # Architecture
//!
//! ```text
//! set_state ──→ Store ──→ Scheduler ──→ listeners ──→ render ──→ diff ──→ apply
//!                 ↑          (one flush per frame)                         │
//!                 └──────────────── previous tree re-pointed ←─────────────┘
//! ```
//!
//! - [`scheduler`]: coalesces callbacks queued during one tick into one flush
//! - [`state`]: observable wrapper tree with per-property subscribers
//! - [`store`]: namespaced, debounced, persisted state with derived values
//! - [`vtree`]: tree model, keyed diff and patch application
//! - [`events`]: topic pub/sub
//! - [`runtime`]: owns the pieces above plus the registry of mounted views

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod runtime;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod vtree;
