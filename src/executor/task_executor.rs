use std::fmt;
use std::time::Duration;

use crate::error::BridgeError;

/// A unit of work run on an executor thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Dispatch state of an executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecutorState {
    Running = 0,
    Paused = 1,
    ShutDown = 2,
}

impl ExecutorState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ExecutorState::Running,
            1 => ExecutorState::Paused,
            _ => ExecutorState::ShutDown,
        }
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorState::Running => write!(f, "running"),
            ExecutorState::Paused => write!(f, "paused"),
            ExecutorState::ShutDown => write!(f, "shut down"),
        }
    }
}

/// A worker pool whose dispatch can be suspended.
///
/// The broker runs delivery callbacks on it, and a `Connection` drives its
/// pause/resume/shutdown.
pub trait TaskExecutor: Send + Sync {
    /// Queue a task. Accepted while running or paused; rejected after shutdown.
    fn submit(&self, task: Task) -> Result<(), BridgeError>;

    /// Stop starting new tasks. Tasks already running are not waited for.
    ///
    /// Idempotent. On `InterruptedDuringPause` the previous state is restored.
    fn pause(&self) -> Result<(), BridgeError>;

    /// Release queued tasks. Idempotent.
    fn resume(&self) -> Result<(), BridgeError>;

    /// Stop accepting tasks; queued and running ones may still complete.
    fn shutdown(&self);

    /// Wait up to `timeout` for all work to finish after `shutdown`.
    ///
    /// Returns `false` if the timeout elapsed, in which case queued tasks
    /// that never started have been abandoned.
    fn await_termination(&self, timeout: Duration) -> Result<bool, BridgeError>;

    fn state(&self) -> ExecutorState;
}
