//! In-memory broker for testing and single-process scenarios.
//!
//! Queues are plain FIFO buffers. Each consumer registration carries one
//! credit: it receives at most one delivery and is then retired, which is
//! the contract a `RendezvousConsumer` expects. Deliveries are handed to
//! the connection's executor as tasks, so pausing that executor pauses
//! delivery exactly as it would with a network client.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use super::{Broker, BrokerConnection, BrokerError, Channel, DeliveryHandler};
use crate::executor::TaskExecutor;
use crate::message::{Delivery, DeliveryTag, Message};

struct Queued {
    message: Message,
    redelivered: bool,
}

struct Subscription {
    consumer_tag: String,
    channel_id: u64,
    handler: Arc<dyn DeliveryHandler>,
    executor: Arc<dyn TaskExecutor>,
}

struct Unacked {
    queue: String,
    channel_id: u64,
    message: Message,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<Queued>>,
    consumers: HashMap<String, VecDeque<Subscription>>,
    unacked: HashMap<DeliveryTag, Unacked>,
    next_tag: u64,
    acked: Vec<DeliveryTag>,
    nacked: Vec<(DeliveryTag, bool)>,
    cancelled: Vec<String>,
}

impl BrokerState {
    /// Pair waiting consumers with queued messages, retiring each consumer's credit.
    fn take_ready(&mut self) -> Vec<(Subscription, Delivery)> {
        let mut ready = Vec::new();
        for (queue, waiting) in self.consumers.iter_mut() {
            let Some(messages) = self.queues.get_mut(queue) else {
                continue;
            };
            while !waiting.is_empty() && !messages.is_empty() {
                let (Some(subscription), Some(queued)) = (waiting.pop_front(), messages.pop_front())
                else {
                    break;
                };
                self.next_tag += 1;
                let tag = DeliveryTag(self.next_tag);
                self.unacked.insert(
                    tag,
                    Unacked {
                        queue: queue.clone(),
                        channel_id: subscription.channel_id,
                        message: queued.message.clone(),
                    },
                );
                let delivery = Delivery {
                    tag,
                    redelivered: queued.redelivered,
                    message: queued.message,
                };
                ready.push((subscription, delivery));
            }
        }
        ready
    }

    fn requeue(&mut self, tag: DeliveryTag) {
        if let Some(unacked) = self.unacked.remove(&tag) {
            self.queues
                .entry(unacked.queue)
                .or_default()
                .push_front(Queued {
                    message: unacked.message,
                    redelivered: true,
                });
        }
    }
}

/// Thread-safe in-process broker. Clones share the same queues.
///
/// ## Example
///
/// ```
/// use msgbridge::{ConnectionConfig, ConnectionFactory, InMemoryBroker, Message};
/// use std::time::Duration;
///
/// let broker = InMemoryBroker::new();
/// let factory = ConnectionFactory::new(broker.clone(), ConnectionConfig::default().with_workers(1));
/// let connection = factory.create_connection().unwrap();
/// connection.start().unwrap();
///
/// broker.publish("orders", Message::text("order-1"));
///
/// let session = connection.create_session().unwrap();
/// let received = session.receive("orders", Some(Duration::from_secs(1))).unwrap();
/// assert_eq!(received.unwrap().body_str(), Some("order-1"));
/// assert_eq!(broker.acked().len(), 1);
///
/// connection.close().unwrap();
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    next_channel: Arc<AtomicU64>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BrokerState>, BrokerError> {
        self.state
            .lock()
            .map_err(|_| BrokerError::Io("broker state poisoned".into()))
    }

    fn inspect(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message to `queue` and dispatch it if a consumer is waiting.
    pub fn publish(&self, queue: &str, message: Message) {
        self.inspect()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(Queued {
                message,
                redelivered: false,
            });
        self.dispatch();
    }

    /// Number of messages waiting in `queue` (excludes unacknowledged ones).
    pub fn queue_len(&self, queue: &str) -> usize {
        self.inspect().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Delivery tags acknowledged so far, in order.
    pub fn acked(&self) -> Vec<DeliveryTag> {
        self.inspect().acked.clone()
    }

    /// Negative acknowledgments so far as `(tag, requeue)` pairs.
    pub fn nacked(&self) -> Vec<(DeliveryTag, bool)> {
        self.inspect().nacked.clone()
    }

    /// Consumer tags whose subscriptions were cancelled.
    pub fn cancelled(&self) -> Vec<String> {
        self.inspect().cancelled.clone()
    }

    pub fn unacked_len(&self) -> usize {
        self.inspect().unacked.len()
    }

    fn dispatch(&self) {
        let ready = self.inspect().take_ready();
        for (subscription, delivery) in ready {
            let tag = delivery.tag;
            let handler = Arc::clone(&subscription.handler);
            let consumer_tag = subscription.consumer_tag.clone();
            debug!(consumer_tag = %consumer_tag, delivery_tag = %tag, "dispatching delivery");
            let submitted = subscription.executor.submit(Box::new(move || {
                if let Err(e) = handler.handle_delivery(delivery) {
                    warn!(consumer_tag = %consumer_tag, delivery_tag = %tag, error = %e, "consumer rejected delivery");
                }
            }));
            if let Err(e) = submitted {
                warn!(delivery_tag = %tag, error = %e, "executor refused delivery, requeueing");
                self.inspect().requeue(tag);
            }
        }
    }
}

impl Broker for InMemoryBroker {
    fn connect(
        &self,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        Ok(Arc::new(InMemoryConnection {
            broker: self.clone(),
            executor,
            channels: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Connection handle returned by `InMemoryBroker::connect`.
pub struct InMemoryConnection {
    broker: InMemoryBroker,
    executor: Arc<dyn TaskExecutor>,
    channels: Mutex<Vec<Arc<InMemoryChannel>>>,
    closed: AtomicBool,
}

impl BrokerConnection for InMemoryConnection {
    fn create_channel(&self) -> Result<Arc<dyn Channel>, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionClosed);
        }
        let channel = Arc::new(InMemoryChannel {
            id: self.broker.next_channel.fetch_add(1, Ordering::SeqCst) + 1,
            broker: self.broker.clone(),
            executor: Arc::clone(&self.executor),
            open: AtomicBool::new(true),
        });
        self.channels
            .lock()
            .map_err(|_| BrokerError::Io("channel list poisoned".into()))?
            .push(Arc::clone(&channel));
        Ok(channel)
    }

    fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let channels = std::mem::take(
            &mut *self
                .channels
                .lock()
                .map_err(|_| BrokerError::Io("channel list poisoned".into()))?,
        );
        for channel in channels {
            channel.close()?;
        }
        Ok(())
    }
}

pub struct InMemoryChannel {
    id: u64,
    broker: InMemoryBroker,
    executor: Arc<dyn TaskExecutor>,
    open: AtomicBool,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::ChannelClosed)
        }
    }
}

impl Channel for InMemoryChannel {
    fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.broker
            .lock()?
            .consumers
            .entry(queue.to_string())
            .or_default()
            .push_back(Subscription {
                consumer_tag: consumer_tag.to_string(),
                channel_id: self.id,
                handler,
                executor: Arc::clone(&self.executor),
            });
        self.broker.dispatch();
        Ok(())
    }

    fn basic_cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.lock()?;
        for waiting in state.consumers.values_mut() {
            waiting.retain(|s| s.consumer_tag != consumer_tag);
        }
        state.cancelled.push(consumer_tag.to_string());
        Ok(())
    }

    fn basic_ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.lock()?;
        state
            .unacked
            .remove(&tag)
            .ok_or(BrokerError::UnknownDelivery(tag.0))?;
        state.acked.push(tag);
        Ok(())
    }

    fn basic_nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        self.ensure_open()?;
        {
            let mut state = self.broker.lock()?;
            if !state.unacked.contains_key(&tag) {
                return Err(BrokerError::UnknownDelivery(tag.0));
            }
            state.nacked.push((tag, requeue));
            if requeue {
                state.requeue(tag);
            } else {
                state.unacked.remove(&tag);
            }
        }
        if requeue {
            self.broker.dispatch();
        }
        Ok(())
    }

    fn close(&self) -> Result<(), BrokerError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        {
            let mut state = self.broker.lock()?;
            for waiting in state.consumers.values_mut() {
                waiting.retain(|s| s.channel_id != self.id);
            }
            let orphaned: Vec<DeliveryTag> = state
                .unacked
                .iter()
                .filter(|(_, u)| u.channel_id == self.id)
                .map(|(tag, _)| *tag)
                .collect();
            for tag in orphaned {
                state.requeue(tag);
            }
        }
        self.broker.dispatch();
        Ok(())
    }
}
