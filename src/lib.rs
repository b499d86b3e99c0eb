mod broker;
mod config;
mod connection;
mod consumer;
mod error;
mod exception;
mod executor;
mod message;

pub use broker::{
    Broker, BrokerConnection, BrokerError, Channel, DeliveryHandler, InMemoryBroker,
    InMemoryChannel, InMemoryConnection,
};
pub use config::{ConnectionConfig, ExecutorConfig};
pub use connection::{Connection, ConnectionFactory, Session};
pub use consumer::RendezvousConsumer;
pub use error::BridgeError;
pub use exception::ExceptionSink;
pub use executor::{ExecutorState, PausableExecutor, Task, TaskExecutor};
pub use message::{Delivery, DeliveryTag, Message};
