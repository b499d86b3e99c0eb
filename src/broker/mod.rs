//! Broker seam - the external messaging client behind traits.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │              Broker::connect(executor)                    │
//! └──────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │   BrokerConnection: create_channel() / close()            │
//! └──────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │   Channel: basic_consume / basic_cancel                   │
//! │            basic_ack / basic_nack / close                 │
//! └──────────────────────────────────────────────────────────┘
//!                            │  deliveries run as executor tasks
//!                            ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │   DeliveryHandler::handle_delivery(delivery)              │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! `InMemoryBroker` implements the whole seam in-process.

mod channel;
mod error;
mod in_memory;

pub use channel::{Broker, BrokerConnection, Channel, DeliveryHandler};
pub use error::BrokerError;
pub use in_memory::{InMemoryBroker, InMemoryChannel, InMemoryConnection};
