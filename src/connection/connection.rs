use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::session::Session;
use crate::broker::BrokerConnection;
use crate::config::ConnectionConfig;
use crate::error::BridgeError;
use crate::exception::ExceptionSink;
use crate::executor::TaskExecutor;

/// State shared between a `Connection` handle and the sessions it created.
///
/// Sessions only hold a `Weak` to this and only call `session_close`.
pub(crate) struct ConnectionShared {
    broker: Arc<dyn BrokerConnection>,
    executor: Arc<dyn TaskExecutor>,
    sessions: Mutex<HashMap<u64, Arc<Session>>>,
    /// Serializes start/stop/close fan-out and session registration.
    lifecycle: Mutex<()>,
    stopped: AtomicBool,
    closed: AtomicBool,
    next_session: AtomicU64,
    close_grace: Duration,
    client_id: Mutex<Option<String>>,
    exceptions: ExceptionSink,
}

impl ConnectionShared {
    /// Drop a session from the live set. Called by `Session::close` only.
    pub(crate) fn session_close(&self, id: u64) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

/// Coordinates the lifecycle of a broker connection, its delivery executor
/// and every session created from it.
///
/// A connection starts stopped. `start()` resumes the executor and then the
/// sessions; `stop()` pauses the executor and then the sessions, so a
/// session never runs ahead of the pool that feeds it.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<ConnectionShared>,
}

impl Connection {
    /// Wrap an established broker connection.
    ///
    /// `executor` must be the pool the broker runs delivery callbacks on, and
    /// should be paused: the connection starts in the stopped state.
    pub fn new(
        broker: Arc<dyn BrokerConnection>,
        executor: Arc<dyn TaskExecutor>,
        config: &ConnectionConfig,
    ) -> Self {
        Self {
            shared: Arc::new(ConnectionShared {
                broker,
                executor,
                sessions: Mutex::new(HashMap::new()),
                lifecycle: Mutex::new(()),
                stopped: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                next_session: AtomicU64::new(0),
                close_grace: config.close_grace(),
                client_id: Mutex::new(config.client_id.clone()),
                exceptions: ExceptionSink::new(),
            }),
        }
    }

    fn ensure_open(&self) -> Result<(), BridgeError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            Err(BridgeError::Closed("connection"))
        } else {
            Ok(())
        }
    }

    fn lifecycle(&self) -> Result<MutexGuard<'_, ()>, BridgeError> {
        self.shared
            .lifecycle
            .lock()
            .map_err(|_| BridgeError::LockPoisoned("connection lifecycle"))
    }

    fn sessions_snapshot(&self) -> Vec<Arc<Session>> {
        self.shared
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Open a channel and register a new session on it.
    ///
    /// A session created while the connection is stopped starts paused.
    pub fn create_session(&self) -> Result<Arc<Session>, BridgeError> {
        self.ensure_open()?;
        let _lifecycle = self.lifecycle()?;
        self.ensure_open()?;

        let channel = self.shared.broker.create_channel()?;
        let id = self.shared.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(Session::new(
            id,
            channel,
            Arc::downgrade(&self.shared),
            self.shared.exceptions.clone(),
            self.shared.stopped.load(Ordering::SeqCst),
        ));
        self.shared
            .sessions
            .lock()
            .map_err(|_| BridgeError::LockPoisoned("session registry"))?
            .insert(id, Arc::clone(&session));
        debug!(session = id, "session created");
        Ok(session)
    }

    /// Begin delivering messages. Idempotent.
    pub fn start(&self) -> Result<(), BridgeError> {
        self.ensure_open()?;
        let _lifecycle = self.lifecycle()?;
        self.ensure_open()?;

        if self
            .shared
            .stopped
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if let Err(e) = self.shared.executor.resume() {
                self.shared.stopped.store(true, Ordering::SeqCst);
                return Err(e);
            }
            for session in self.sessions_snapshot() {
                session.resume();
            }
            info!("connection started");
        }
        Ok(())
    }

    /// Suspend delivery and unblock every pending receive. Idempotent.
    ///
    /// If the executor cannot be paused the connection stays started, its
    /// sessions are left untouched and the error is returned.
    pub fn stop(&self) -> Result<(), BridgeError> {
        self.ensure_open()?;
        let _lifecycle = self.lifecycle()?;
        self.ensure_open()?;

        if self
            .shared
            .stopped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if let Err(e) = self.shared.executor.pause() {
                self.shared.stopped.store(false, Ordering::SeqCst);
                warn!(error = %e, "stop aborted, executor still running");
                return Err(e);
            }
            for session in self.sessions_snapshot() {
                session.pause();
            }
            info!("connection stopped");
        }
        Ok(())
    }

    pub fn is_stopped(&self) -> Result<bool, BridgeError> {
        self.ensure_open()?;
        Ok(self.shared.stopped.load(Ordering::SeqCst))
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Shut everything down. Idempotent.
    ///
    /// Each step runs even if an earlier one failed: executor shutdown,
    /// session close, bounded wait for the executor, broker close. Failures
    /// are recorded and the first one is returned once all steps have run.
    pub fn close(&self) -> Result<(), BridgeError> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _lifecycle = self
            .shared
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut first_failure = None;

        self.shared.executor.shutdown();

        for session in self.sessions_snapshot() {
            if let Err(e) = session.close() {
                self.note_failure(&mut first_failure, "close session", e);
            }
        }

        match self.shared.executor.await_termination(self.shared.close_grace) {
            Ok(true) => {}
            Ok(false) => self.note_failure(
                &mut first_failure,
                "await executor termination",
                BridgeError::ShutdownTimedOut(self.shared.close_grace),
            ),
            Err(e) => self.note_failure(&mut first_failure, "await executor termination", e),
        }

        if let Err(e) = self.shared.broker.close() {
            self.note_failure(&mut first_failure, "close broker connection", e.into());
        }

        info!("connection closed");
        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn note_failure(&self, first: &mut Option<BridgeError>, step: &str, error: BridgeError) {
        self.shared.exceptions.record(step, &error);
        if first.is_none() {
            *first = Some(error);
        }
    }

    pub fn client_id(&self) -> Result<Option<String>, BridgeError> {
        self.ensure_open()?;
        Ok(self
            .shared
            .client_id
            .lock()
            .map_err(|_| BridgeError::LockPoisoned("client id"))?
            .clone())
    }

    pub fn set_client_id(&self, client_id: impl Into<String>) -> Result<(), BridgeError> {
        self.ensure_open()?;
        *self
            .shared
            .client_id
            .lock()
            .map_err(|_| BridgeError::LockPoisoned("client id"))? = Some(client_id.into());
        Ok(())
    }

    /// Number of sessions that have not been closed.
    pub fn session_count(&self) -> usize {
        self.shared
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Failures recorded on paths that could not return them.
    pub fn recorded_exceptions(&self) -> Vec<String> {
        self.shared.exceptions.recorded()
    }

    /// Register a listener for failures recorded by this connection and its
    /// sessions.
    #[cfg(feature = "emitter")]
    pub fn on_exception<F>(&self, listener: F) -> Result<(), BridgeError>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        self.shared.exceptions.on_exception(listener);
        Ok(())
    }
}
