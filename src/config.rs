//! Connection and executor configuration.
//!
//! Every field has a default, so a partial JSON document is enough:
//!
//! ```
//! use msgbridge::ConnectionConfig;
//!
//! let config = ConnectionConfig::from_json(r#"{"executor": {"workers": 2}}"#).unwrap();
//! assert_eq!(config.executor.workers, 2);
//! assert_eq!(config.close_grace_ms, 60_000);
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::BridgeError;

/// Sizing and naming of the delivery worker pool.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    pub workers: usize,
    pub thread_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            thread_name: "msgbridge-worker".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub executor: ExecutorConfig,
    /// How long `close()` waits for in-flight deliveries to drain.
    pub close_grace_ms: u64,
    pub client_id: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            close_grace_ms: 60_000,
            client_id: None,
        }
    }
}

impl ConnectionConfig {
    pub fn from_json(json: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(json).map_err(|e| BridgeError::Config(e.to_string()))
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.executor.workers = workers;
        self
    }

    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}
