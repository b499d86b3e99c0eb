use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::broker::{Channel, DeliveryHandler};
use crate::error::BridgeError;
use crate::exception::ExceptionSink;
use crate::message::{Delivery, DeliveryTag, Message};

/// A delivery that has arrived but has not been acked or nacked yet.
#[derive(Debug)]
struct PendingDelivery {
    delivery: Delivery,
    arrived_at: Instant,
}

#[derive(Debug)]
enum Phase {
    /// Nothing delivered; a receiver may still claim a delivery.
    Waiting,
    Delivered(PendingDelivery),
    Claimed,
    /// The receiver gave up before anything arrived.
    Abandoned,
    /// A delivery was nacked back to the broker.
    Requeued,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Waiting => "waiting",
            Phase::Delivered(_) => "holding an unclaimed delivery",
            Phase::Claimed => "claimed",
            Phase::Abandoned => "abandoned",
            Phase::Requeued => "requeued",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Receiver {
    Idle,
    Blocked,
    Finished,
}

#[derive(Debug)]
struct Slot {
    phase: Phase,
    receiver: Receiver,
    cancel_requested: bool,
    subscription_cancelled: bool,
}

/// The terminal decision, taken under the slot lock and carried out after it.
enum Resolution {
    Claim(PendingDelivery),
    Requeue(PendingDelivery),
    Empty,
}

impl Slot {
    fn abandon(&mut self) -> Resolution {
        match mem::replace(&mut self.phase, Phase::Abandoned) {
            Phase::Delivered(pending) => {
                self.phase = Phase::Requeued;
                Resolution::Requeue(pending)
            }
            Phase::Waiting => Resolution::Empty,
            settled => {
                self.phase = settled;
                Resolution::Empty
            }
        }
    }

    /// True exactly once: the first caller owns the subscription cancel.
    fn take_cancel_subscription(&mut self) -> bool {
        !mem::replace(&mut self.subscription_cancelled, true)
    }
}

/// Single-slot handoff between one broker delivery and one blocking receive.
///
/// The consumer is subscribed with one credit, so the broker offers it at
/// most one message. Whatever happens (claim, timeout, cancellation, or a
/// delivery that turns up late) the message is acked or nacked exactly once,
/// and the subscription is cancelled exactly once.
///
/// ```text
/// Waiting ──on_delivery──▶ Delivered ──receive──▶ Claimed   (ack)
///    │                         └──cancel────────▶ Requeued  (nack, requeue)
///    └──timeout / cancel──▶ Abandoned ──late delivery──▶ Requeued
/// ```
pub struct RendezvousConsumer {
    consumer_tag: String,
    channel: Arc<dyn Channel>,
    exceptions: ExceptionSink,
    slot: Mutex<Slot>,
    arrived: Condvar,
}

impl RendezvousConsumer {
    pub fn new(
        consumer_tag: impl Into<String>,
        channel: Arc<dyn Channel>,
        exceptions: ExceptionSink,
    ) -> Self {
        Self {
            consumer_tag: consumer_tag.into(),
            channel,
            exceptions,
            slot: Mutex::new(Slot {
                phase: Phase::Waiting,
                receiver: Receiver::Idle,
                cancel_requested: false,
                subscription_cancelled: false,
            }),
            arrived: Condvar::new(),
        }
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// True once the consumer can no longer hand a message to a receiver.
    pub fn is_finished(&self) -> bool {
        let slot = self.lock_slot();
        slot.receiver == Receiver::Finished
            || matches!(
                slot.phase,
                Phase::Claimed | Phase::Abandoned | Phase::Requeued
            )
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept the single delivery this consumer has credit for.
    ///
    /// A delivery that arrives after the receiver gave up is nacked with
    /// requeue. Any delivery beyond the first is a protocol violation and is
    /// neither acked nor nacked here.
    pub fn on_delivery(&self, delivery: Delivery) -> Result<(), BridgeError> {
        let tag = delivery.tag;
        {
            let mut guard = self.lock_slot();
            let slot = &mut *guard;
            match slot.phase {
                Phase::Waiting => {
                    trace!(consumer_tag = %self.consumer_tag, delivery_tag = %tag, "delivery stored");
                    slot.phase = Phase::Delivered(PendingDelivery {
                        delivery,
                        arrived_at: Instant::now(),
                    });
                    self.arrived.notify_all();
                    return Ok(());
                }
                Phase::Abandoned => {
                    slot.phase = Phase::Requeued;
                }
                ref other => {
                    return Err(BridgeError::ProtocolViolation(format!(
                        "delivery {} offered to consumer {} while {}",
                        tag,
                        self.consumer_tag,
                        other.name()
                    )));
                }
            }
        }

        debug!(consumer_tag = %self.consumer_tag, delivery_tag = %tag, "late delivery, requeueing");
        self.requeue(tag);
        Ok(())
    }

    /// Block until a delivery is available, `timeout` elapses or the consumer
    /// is cancelled. `None` waits indefinitely.
    ///
    /// Returns `Ok(None)` when no message was claimed. Only the first call
    /// does anything; later calls are protocol violations.
    pub fn receive(&self, timeout: Option<Duration>) -> Result<Option<Message>, BridgeError> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let (resolution, cancel_subscription) = {
            let mut slot = self.lock_slot();
            if slot.receiver != Receiver::Idle {
                return Err(BridgeError::ProtocolViolation(format!(
                    "receive called more than once on consumer {}",
                    self.consumer_tag
                )));
            }
            slot.receiver = Receiver::Blocked;

            let resolution = loop {
                if slot.cancel_requested {
                    break slot.abandon();
                }
                match mem::replace(&mut slot.phase, Phase::Claimed) {
                    Phase::Delivered(pending) => break Resolution::Claim(pending),
                    Phase::Waiting => slot.phase = Phase::Waiting,
                    settled => {
                        slot.phase = settled;
                        break Resolution::Empty;
                    }
                }
                match deadline {
                    None => {
                        slot = self.arrived.wait(slot).unwrap_or_else(PoisonError::into_inner);
                    }
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            break slot.abandon();
                        }
                        slot = self
                            .arrived
                            .wait_timeout(slot, deadline - now)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0;
                    }
                }
            };

            slot.receiver = Receiver::Finished;
            (resolution, slot.take_cancel_subscription())
        };

        if cancel_subscription {
            self.cancel_subscription();
        }
        match resolution {
            Resolution::Claim(pending) => self.claim(pending).map(Some),
            Resolution::Requeue(pending) => {
                self.requeue(pending.delivery.tag);
                Ok(None)
            }
            Resolution::Empty => Ok(None),
        }
    }

    /// Unblock a waiting receiver as if its timeout had elapsed.
    ///
    /// With no receiver inside `receive()`, the consumer is resolved here: an
    /// unclaimed delivery is requeued and the subscription is cancelled.
    pub fn cancel(&self) {
        let (resolution, cancel_subscription) = {
            let mut slot = self.lock_slot();
            if slot.cancel_requested {
                return;
            }
            slot.cancel_requested = true;
            if slot.receiver == Receiver::Blocked {
                self.arrived.notify_all();
                return;
            }
            (slot.abandon(), slot.take_cancel_subscription())
        };

        if cancel_subscription {
            self.cancel_subscription();
        }
        if let Resolution::Requeue(pending) = resolution {
            self.requeue(pending.delivery.tag);
        }
    }

    fn claim(&self, pending: PendingDelivery) -> Result<Message, BridgeError> {
        let tag = pending.delivery.tag;
        match self.channel.basic_ack(tag) {
            Ok(()) => {
                trace!(
                    consumer_tag = %self.consumer_tag,
                    delivery_tag = %tag,
                    waited_us = pending.arrived_at.elapsed().as_micros() as u64,
                    "delivery acked"
                );
                Ok(pending.delivery.message)
            }
            Err(e) => {
                // The ack never reached the broker; hand the message back
                // rather than leave it unresolved.
                self.requeue(tag);
                Err(e.into())
            }
        }
    }

    fn requeue(&self, tag: DeliveryTag) {
        if let Err(e) = self.channel.basic_nack(tag, true) {
            self.exceptions
                .record("requeue unclaimed delivery", &BridgeError::from(e));
        }
    }

    fn cancel_subscription(&self) {
        if let Err(e) = self.channel.basic_cancel(&self.consumer_tag) {
            self.exceptions
                .record("cancel subscription", &BridgeError::from(e));
        }
    }
}

impl DeliveryHandler for RendezvousConsumer {
    fn handle_delivery(&self, delivery: Delivery) -> Result<(), BridgeError> {
        self.on_delivery(delivery)
    }
}
