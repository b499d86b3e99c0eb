use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tracing::debug;

use super::connection::ConnectionShared;
use crate::broker::{Channel, DeliveryHandler};
use crate::consumer::RendezvousConsumer;
use crate::error::BridgeError;
use crate::exception::ExceptionSink;
use crate::message::Message;

struct SessionState {
    paused: bool,
    closed: bool,
    /// Consumers with a receive in progress, keyed by consumer tag
    consumers: HashMap<String, Arc<RendezvousConsumer>>,
}

/// A single-channel context for synchronous receives.
///
/// Every `receive` subscribes a fresh `RendezvousConsumer` with one credit.
/// Pausing the session cancels those consumers, so a blocked receiver
/// returns as soon as its connection is stopped or closed.
pub struct Session {
    id: u64,
    channel: Arc<dyn Channel>,
    owner: Weak<ConnectionShared>,
    exceptions: ExceptionSink,
    state: Mutex<SessionState>,
    resumed: Condvar,
    next_consumer: AtomicU64,
}

impl Session {
    pub(crate) fn new(
        id: u64,
        channel: Arc<dyn Channel>,
        owner: Weak<ConnectionShared>,
        exceptions: ExceptionSink,
        paused: bool,
    ) -> Self {
        Self {
            id,
            channel,
            owner,
            exceptions,
            state: Mutex::new(SessionState {
                paused,
                closed: false,
                consumers: HashMap::new(),
            }),
            resumed: Condvar::new(),
            next_consumer: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_paused(&self) -> bool {
        self.lock_state().paused
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Number of receives currently blocked on a delivery.
    pub fn active_receivers(&self) -> usize {
        self.lock_state().consumers.len()
    }

    /// Receive one message from `queue`, waiting at most `timeout` (or
    /// indefinitely for `None`).
    ///
    /// While the session is paused no subscription is made; the call waits
    /// for `resume()` within the same deadline. `Ok(None)` means nothing was
    /// received in time, or the receive was cut short by pause or close.
    pub fn receive(
        &self,
        queue: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>, BridgeError> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        let consumer = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| BridgeError::LockPoisoned("session receive"))?;
            if state.closed {
                return Err(BridgeError::Closed("session"));
            }
            while state.paused {
                state = match deadline {
                    None => self
                        .resumed
                        .wait(state)
                        .map_err(|_| BridgeError::LockPoisoned("session receive"))?,
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            return Ok(None);
                        }
                        self.resumed
                            .wait_timeout(state, deadline - now)
                            .map_err(|_| BridgeError::LockPoisoned("session receive"))?
                            .0
                    }
                };
                if state.closed {
                    return Ok(None);
                }
            }

            // Subscribe while holding the state lock so a concurrent pause
            // either sees this consumer or happens before it exists.
            let tag = format!(
                "session-{}-consumer-{}",
                self.id,
                self.next_consumer.fetch_add(1, Ordering::SeqCst) + 1
            );
            let consumer = Arc::new(RendezvousConsumer::new(
                tag.clone(),
                Arc::clone(&self.channel),
                self.exceptions.clone(),
            ));
            self.channel.basic_consume(
                queue,
                &tag,
                Arc::clone(&consumer) as Arc<dyn DeliveryHandler>,
            )?;
            state.consumers.insert(tag, Arc::clone(&consumer));
            consumer
        };

        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        let result = consumer.receive(remaining);
        self.lock_state().consumers.remove(consumer.consumer_tag());
        result
    }

    /// Stop handing messages to receivers. Blocked receives return `Ok(None)`.
    pub fn pause(&self) {
        let active: Vec<_> = {
            let mut state = self.lock_state();
            if state.closed || state.paused {
                return;
            }
            state.paused = true;
            state.consumers.values().cloned().collect()
        };
        debug!(session = self.id, cancelled = active.len(), "session paused");
        for consumer in active {
            consumer.cancel();
        }
    }

    pub fn resume(&self) {
        let mut state = self.lock_state();
        if state.paused && !state.closed {
            state.paused = false;
            self.resumed.notify_all();
            debug!(session = self.id, "session resumed");
        }
    }

    /// Close the session: cancel in-flight receives, close the channel and
    /// deregister from the owning connection. Idempotent.
    pub fn close(&self) -> Result<(), BridgeError> {
        let active: Vec<_> = {
            let mut state = self.lock_state();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            self.resumed.notify_all();
            state.consumers.drain().map(|(_, c)| c).collect()
        };
        for consumer in active {
            consumer.cancel();
        }

        let closed = self.channel.close().map_err(BridgeError::from);
        if let Some(owner) = self.owner.upgrade() {
            owner.session_close(self.id);
        }
        debug!(session = self.id, "session closed");
        closed
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}
