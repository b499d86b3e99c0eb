use std::error::Error;
use std::fmt;
use std::time::Duration;

use crate::broker::BrokerError;

/// Errors surfaced by connections, sessions, consumers and the executor.
///
/// A receive that times out without a message is not an error; it is
/// reported as `Ok(None)`.
#[derive(Debug)]
pub enum BridgeError {
    /// The connection, session or executor has already been closed.
    Closed(&'static str),
    /// The delivery source broke the one-credit contract, or a single-shot
    /// receive was reused.
    ProtocolViolation(String),
    /// Pausing was interrupted before dispatch was halted. The previous state
    /// has been restored and the operation can be retried.
    InterruptedDuringPause(String),
    /// The underlying broker connection or channel failed.
    Connection(BrokerError),
    /// The executor no longer accepts work.
    Rejected(&'static str),
    /// Work was still running when the shutdown grace period ran out.
    ShutdownTimedOut(Duration),
    /// An internal lock was poisoned by a panicking thread.
    LockPoisoned(&'static str),
    /// Configuration could not be parsed.
    Config(String),
    /// A worker thread could not be spawned.
    WorkerSpawn(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Closed(what) => write!(f, "{} is closed", what),
            BridgeError::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            BridgeError::InterruptedDuringPause(msg) => {
                write!(f, "interrupted while pausing: {}", msg)
            }
            BridgeError::Connection(e) => write!(f, "underlying connection error: {}", e),
            BridgeError::Rejected(msg) => write!(f, "task rejected: {}", msg),
            BridgeError::ShutdownTimedOut(grace) => {
                write!(f, "executor still busy after {:?} grace period", grace)
            }
            BridgeError::LockPoisoned(operation) => {
                write!(f, "lock poisoned during {}", operation)
            }
            BridgeError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            BridgeError::WorkerSpawn(msg) => write!(f, "failed to spawn worker: {}", msg),
        }
    }
}

impl Error for BridgeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BridgeError::Connection(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BrokerError> for BridgeError {
    fn from(e: BrokerError) -> Self {
        BridgeError::Connection(e)
    }
}

impl BridgeError {
    /// True for failures the caller may retry without rebuilding anything.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BridgeError::InterruptedDuringPause(_))
    }
}
