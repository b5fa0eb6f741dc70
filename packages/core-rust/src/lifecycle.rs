//! Lifecycle callbacks fired by the execution engine.
//!
//! Callbacks observe inputs and outputs in their JSON form. They are invoked
//! synchronously at each transition and their return values are ignored.
//! A panicking callback never unwinds out of the engine.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tracing::error;

use crate::error::{classify_panic, ActionError};

/// Receives the validated input.
pub type StartCallback = Arc<dyn Fn(&Value) + Send + Sync>;
/// Receives the input and the output.
pub type SuccessCallback = Arc<dyn Fn(&Value, &Value) + Send + Sync>;
/// Receives the input and the terminal error.
pub type ErrorCallback = Arc<dyn Fn(&Value, &ActionError) + Send + Sync>;
/// Receives the input and the terminal outcome.
pub type CompleteCallback = Arc<dyn Fn(&Value, Outcome<'_>) + Send + Sync>;

/// Terminal outcome passed to `on_complete`.
#[derive(Debug, Clone, Copy)]
pub enum Outcome<'a> {
    Success(&'a Value),
    Failure(&'a ActionError),
}

impl Outcome<'_> {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Action-level callbacks.
#[derive(Clone, Default)]
pub struct Lifecycle {
    pub(crate) on_start: Option<StartCallback>,
    pub(crate) on_success: Option<SuccessCallback>,
    pub(crate) on_error: Option<ErrorCallback>,
    pub(crate) on_complete: Option<CompleteCallback>,
}

impl Lifecycle {
    pub(crate) fn wants_data(&self) -> bool {
        self.on_success.is_some() || self.on_complete.is_some()
    }

    /// Terminal success. A panic here is logged; the result stands.
    pub(crate) fn success(&self, input: &Value, data: &Value) {
        if let Some(cb) = &self.on_success {
            let _ = guard("on_success", || cb(input, data));
        }
        if let Some(cb) = &self.on_complete {
            let _ = guard("on_complete", || cb(input, Outcome::Success(data)));
        }
    }

    /// Terminal failure. A panic here is logged; the original error stands.
    pub(crate) fn failure(&self, input: &Value, err: &ActionError) {
        if let Some(cb) = &self.on_error {
            let _ = guard("on_error", || cb(input, err));
        }
        if let Some(cb) = &self.on_complete {
            let _ = guard("on_complete", || cb(input, Outcome::Failure(err)));
        }
    }
}

/// Runs one callback, classifying a panic as an `ERROR`.
pub(crate) fn guard(stage: &'static str, callback: impl FnOnce()) -> Result<(), ActionError> {
    panic::catch_unwind(AssertUnwindSafe(callback)).map_err(|payload| {
        let err = classify_panic(payload.as_ref());
        error!(stage, message = %err.message, "lifecycle callback panicked");
        err
    })
}
