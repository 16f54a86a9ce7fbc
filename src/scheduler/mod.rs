//! Frame-aligned update batching.
//!
//! Callbacks queued with [`Scheduler::enqueue`] during one synchronous burst
//! run together in a single [`Scheduler::flush`]. When the flush happens is
//! decided by a pluggable [`TickSource`]: an explicit frame pump
//! ([`ManualTick`]) or a tokio timer ([`TokioTick`]).
//!
//! # Invariants
//!
//! 1. The pending set is identity-based: the same [`Task`] queued many times
//!    before a flush runs once.
//! 2. Tasks run in the order they were first queued.
//! 3. The pending set is taken before any task runs; work queued during a
//!    flush joins the next cycle and never runs re-entrantly.
//! 4. A panicking task is logged and counted; the remaining tasks still run.

mod batch;
mod tick;

pub use batch::{task, FlushHandle, FlushReport, Scheduler, Task};
pub use tick::{ManualTick, TickSource, TokioTick};
