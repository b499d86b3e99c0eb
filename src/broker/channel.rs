//! Traits implemented by the messaging client this crate sits on top of.

use std::sync::Arc;

use super::BrokerError;
use crate::error::BridgeError;
use crate::executor::TaskExecutor;
use crate::message::{Delivery, DeliveryTag};

/// Push-side callback the broker invokes once per outstanding credit.
///
/// Implementations run on the connection's executor threads.
pub trait DeliveryHandler: Send + Sync {
    fn handle_delivery(&self, delivery: Delivery) -> Result<(), BridgeError>;
}

/// A channel multiplexed over a broker connection.
pub trait Channel: Send + Sync {
    /// Register `handler` for deliveries from `queue` under `consumer_tag`.
    fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<(), BrokerError>;

    /// Stop further deliveries to the consumer registered under `consumer_tag`.
    fn basic_cancel(&self, consumer_tag: &str) -> Result<(), BrokerError>;

    /// Positively acknowledge a single delivery.
    fn basic_ack(&self, tag: DeliveryTag) -> Result<(), BrokerError>;

    /// Reject a single delivery, optionally asking the broker to redeliver it.
    fn basic_nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError>;

    fn close(&self) -> Result<(), BrokerError>;
}

/// The TCP-level connection handle owned by a `Connection`.
pub trait BrokerConnection: Send + Sync {
    fn create_channel(&self) -> Result<Arc<dyn Channel>, BrokerError>;

    fn close(&self) -> Result<(), BrokerError>;
}

/// Entry point for establishing broker connections.
///
/// The executor passed to `connect` is the pool delivery callbacks run on,
/// which is what lets a `Connection` pause delivery by pausing the pool.
pub trait Broker: Send + Sync {
    fn connect(
        &self,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError>;
}
