//! Failure isolation for user callbacks.
//!
//! Scheduler tasks, store listeners and bus listeners all run through
//! [`guard`], so one panicking callback is logged and counted while its
//! siblings keep running.

use std::any::Any;
use std::fmt::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};

use thiserror::Error;

/// A callback panicked while the runtime was invoking it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Callback failed in {context}: {message}")]
pub struct CallbackFailure {
    /// Where the callback was invoked from (e.g. `"store.listener"`).
    pub context: String,
    /// Panic payload rendered as text.
    pub message: String,
}

/// Run `f`, converting a panic into a logged [`CallbackFailure`].
pub fn guard<F: FnOnce()>(context: &str, f: F) -> Result<(), CallbackFailure> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => Ok(()),
        Err(payload) => {
            let failure = CallbackFailure {
                context: context.to_string(),
                message: panic_message(payload.as_ref()),
            };
            tracing::error!(
                context = %failure.context,
                message = %failure.message,
                "Callback failed"
            );
            Err(failure)
        }
    }
}

/// Run a fallible operation, logging an error and returning `fallback`.
///
/// Used for environmental work (storage, serialization) whose failure must
/// not reach the caller.
pub fn boundary<T, E, F>(context: &str, f: F, fallback: T) -> T
where
    E: Display,
    F: FnOnce() -> Result<T, E>,
{
    match f() {
        Ok(value) => value,
        Err(err) => {
            tracing::error!(context = %context, error = %err, "Operation failed, using fallback");
            fallback
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
