use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::scheduler::batch::FlushHandle;

/// Decides when an armed flush actually runs.
pub trait TickSource: Send + Sync {
    /// Called once per armed flush; implementations call `handle.flush()`
    /// at the next rendering opportunity.
    fn request_flush(&self, handle: FlushHandle);
}

/// Explicit frame pump.
///
/// Records that a flush was requested; the owner decides when to call
/// [`Scheduler::flush`](super::Scheduler::flush). Clones share state.
#[derive(Clone, Default)]
pub struct ManualTick {
    requested: Arc<AtomicBool>,
    requests: Arc<AtomicU64>,
}

impl ManualTick {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a flush is waiting for the pump.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Clear and return the pending request flag.
    pub fn take_request(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }

    /// Total number of flush requests received.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }
}

impl TickSource for ManualTick {
    fn request_flush(&self, _handle: FlushHandle) {
        self.requested.store(true, Ordering::SeqCst);
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

/// Flushes one frame interval after the request, on a tokio runtime.
pub struct TokioTick {
    runtime: tokio::runtime::Handle,
    frame: Duration,
}

impl TokioTick {
    /// Use the runtime the caller is running on.
    ///
    /// # Errors
    /// Returns an error when called outside a tokio runtime.
    pub fn current(frame: Duration) -> Result<Self, tokio::runtime::TryCurrentError> {
        Ok(Self::from_handle(tokio::runtime::Handle::try_current()?, frame))
    }

    pub fn from_handle(runtime: tokio::runtime::Handle, frame: Duration) -> Self {
        Self { runtime, frame }
    }

    pub fn frame(&self) -> Duration {
        self.frame
    }
}

impl TickSource for TokioTick {
    fn request_flush(&self, handle: FlushHandle) {
        let frame = self.frame;
        self.runtime.spawn(async move {
            tokio::time::sleep(frame).await;
            if handle.flush().is_none() {
                tracing::trace!("Scheduler dropped before its frame");
            }
        });
    }
}
