//! Failures that are recorded rather than returned.
//!
//! Some errors happen on paths that must keep going: nacking a delivery the
//! receiver already gave up on, or one step of a best-effort close. Those go
//! to an `ExceptionSink`, which logs them, keeps them for inspection and,
//! with the `emitter` feature, forwards them to registered listeners.

use std::sync::{Arc, Mutex, PoisonError};

#[cfg(feature = "emitter")]
use event_emitter_rs::EventEmitter;
use tracing::warn;

use crate::error::BridgeError;

#[cfg(feature = "emitter")]
const EXCEPTION_EVENT: &str = "exception";

struct SinkInner {
    recorded: Mutex<Vec<String>>,
    #[cfg(feature = "emitter")]
    emitter: Mutex<EventEmitter>,
}

/// Shared, cloneable recorder for non-fatal failures.
#[derive(Clone)]
pub struct ExceptionSink {
    inner: Arc<SinkInner>,
}

impl Default for ExceptionSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ExceptionSink {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SinkInner {
                recorded: Mutex::new(Vec::new()),
                #[cfg(feature = "emitter")]
                emitter: Mutex::new(EventEmitter::new()),
            }),
        }
    }

    /// Record `error`, tagged with the step that produced it.
    pub fn record(&self, context: &str, error: &BridgeError) {
        warn!(context, error = %error, "recorded failure");
        let line = format!("{}: {}", context, error);
        self.inner
            .recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.clone());

        #[cfg(feature = "emitter")]
        self.inner
            .emitter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .emit(EXCEPTION_EVENT, line);
    }

    /// Everything recorded so far, oldest first.
    pub fn recorded(&self) -> Vec<String> {
        self.inner
            .recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Register a listener invoked (asynchronously) for every recorded failure.
    #[cfg(feature = "emitter")]
    pub fn on_exception<F>(&self, listener: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.inner
            .emitter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on(EXCEPTION_EVENT, listener);
    }
}
