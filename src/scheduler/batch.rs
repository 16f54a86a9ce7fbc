use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{self, CallbackFailure};
use crate::scheduler::tick::TickSource;

/// A zero-argument update callback.
///
/// Identity is the `Arc` allocation: clones of one task deduplicate, two
/// closures with the same body do not.
pub type Task = Arc<dyn Fn() + Send + Sync>;

/// Wrap a closure as a [`Task`].
pub fn task(f: impl Fn() + Send + Sync + 'static) -> Task {
    Arc::new(f)
}

/// Outcome of one flush.
#[derive(Debug, Default, Clone)]
pub struct FlushReport {
    /// Number of tasks executed.
    pub ran: usize,
    /// Tasks that panicked.
    pub failures: Vec<CallbackFailure>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.ran == 0
    }
}

/// Coalescing update scheduler.
///
/// Cheap to clone; all clones share one pending set.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    state: Mutex<BatchState>,
    tick: Box<dyn TickSource>,
}

#[derive(Default)]
struct BatchState {
    pending: Vec<Task>,
    /// A flush has been requested from the tick source and not yet run.
    armed: bool,
    /// Re-entrancy guard.
    flushing: bool,
    flushes: u64,
    /// Failures caught by tasks themselves, folded into the next report.
    reported: Vec<CallbackFailure>,
}

impl Scheduler {
    /// Create a scheduler driven by `tick`.
    pub fn new<T: TickSource + 'static>(tick: T) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                state: Mutex::new(BatchState::default()),
                tick: Box::new(tick),
            }),
        }
    }

    /// Queue `task` for the next flush, arming one if needed.
    pub fn enqueue(&self, task: &Task) {
        let arm = {
            let mut state = self.inner.state.lock();
            if !state.pending.iter().any(|queued| same_task(queued, task)) {
                state.pending.push(Arc::clone(task));
            }
            if state.armed || state.flushing {
                false
            } else {
                state.armed = true;
                true
            }
        };

        if arm {
            tracing::trace!("Flush requested");
            self.inner.tick.request_flush(self.handle());
        }
    }

    /// Run every pending task once.
    ///
    /// Returns an empty report when nothing is pending or when called from
    /// inside a running flush.
    pub fn flush(&self) -> FlushReport {
        let tasks = {
            let mut state = self.inner.state.lock();
            if state.flushing {
                tracing::trace!("Flush already in progress, skipping");
                return FlushReport::default();
            }
            state.armed = false;
            if state.pending.is_empty() {
                return FlushReport::default();
            }
            state.flushing = true;
            state.flushes += 1;
            std::mem::take(&mut state.pending)
        };

        let mut report = FlushReport::default();
        {
            let inner = &self.inner;
            let _reset = scopeguard::guard((), |_| inner.state.lock().flushing = false);
            for task in &tasks {
                report.ran += 1;
                if let Err(failure) = error::guard("scheduler.flush", || task()) {
                    report.failures.push(failure);
                }
            }
        }
        report
            .failures
            .append(&mut self.inner.state.lock().reported);

        tracing::debug!(
            ran = report.ran,
            failed = report.failures.len(),
            "Flush complete"
        );

        // Work queued while flushing waits for its own frame.
        let rearm = {
            let mut state = self.inner.state.lock();
            if !state.pending.is_empty() && !state.armed {
                state.armed = true;
                true
            } else {
                false
            }
        };
        if rearm {
            self.inner.tick.request_flush(self.handle());
        }

        report
    }

    /// Record a failure a task caught on its own, such as a panicking
    /// listener it isolated. It appears in the report of the flush in
    /// progress, or of the next one when called outside a flush.
    pub fn report_failure(&self, failure: CallbackFailure) {
        self.inner.state.lock().reported.push(failure);
    }

    /// Flush repeatedly until nothing is pending or `max_passes` is reached.
    ///
    /// A task that re-queues itself every pass keeps this busy until the
    /// limit. `Runtime::settle` waits out store debounces between passes.
    pub fn flush_until_idle(&self, max_passes: usize) -> FlushReport {
        let mut total = FlushReport::default();
        for _ in 0..max_passes {
            let report = self.flush();
            if report.is_empty() {
                break;
            }
            total.ran += report.ran;
            total.failures.extend(report.failures);
        }
        total
    }

    /// Number of distinct tasks waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn is_armed(&self) -> bool {
        self.inner.state.lock().armed
    }

    pub fn is_flushing(&self) -> bool {
        self.inner.state.lock().flushing
    }

    /// Number of flushes that executed at least one task.
    pub fn flush_count(&self) -> u64 {
        self.inner.state.lock().flushes
    }

    /// Weak handle a tick source can use to trigger the flush later.
    pub fn handle(&self) -> FlushHandle {
        FlushHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Weak reference to a [`Scheduler`] handed to tick sources.
///
/// Holding one does not keep the scheduler alive.
#[derive(Clone)]
pub struct FlushHandle {
    inner: Weak<SchedulerInner>,
}

impl FlushHandle {
    /// Flush the scheduler if it still exists.
    pub fn flush(&self) -> Option<FlushReport> {
        self.inner
            .upgrade()
            .map(|inner| Scheduler { inner }.flush())
    }
}

fn same_task(a: &Task, b: &Task) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
