use std::sync::Arc;

use tracing::debug;

use super::Connection;
use crate::broker::Broker;
use crate::config::ConnectionConfig;
use crate::error::BridgeError;
use crate::executor::{PausableExecutor, TaskExecutor};

/// Builds connections whose delivery callbacks run on a dedicated,
/// initially paused `PausableExecutor`.
pub struct ConnectionFactory<B: Broker> {
    broker: B,
    config: ConnectionConfig,
}

impl<B: Broker> ConnectionFactory<B> {
    pub fn new(broker: B, config: ConnectionConfig) -> Self {
        Self { broker, config }
    }

    /// Create a factory from a JSON configuration document.
    pub fn from_json(broker: B, json: &str) -> Result<Self, BridgeError> {
        Ok(Self::new(broker, ConnectionConfig::from_json(json)?))
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connect to the broker. The returned connection is stopped.
    pub fn create_connection(&self) -> Result<Connection, BridgeError> {
        let executor: Arc<dyn TaskExecutor> =
            Arc::new(PausableExecutor::new_paused(self.config.executor.clone())?);
        let broker = match self.broker.connect(Arc::clone(&executor)) {
            Ok(broker) => broker,
            Err(e) => {
                executor.shutdown();
                return Err(e.into());
            }
        };
        debug!(workers = self.config.executor.workers, "connection established");
        Ok(Connection::new(broker, executor, &self.config))
    }
}
