use std::fmt;

/// Failure reported by the external broker connection or one of its channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The connection to the broker is closed
    ConnectionClosed,
    /// The channel used for the operation is closed
    ChannelClosed,
    /// No unacknowledged delivery carries this tag
    UnknownDelivery(u64),
    /// Transport-level failure
    Io(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::ConnectionClosed => write!(f, "broker connection closed"),
            BrokerError::ChannelClosed => write!(f, "channel closed"),
            BrokerError::UnknownDelivery(tag) => write!(f, "unknown delivery tag {}", tag),
            BrokerError::Io(msg) => write!(f, "i/o error: {}", msg),
        }
    }
}

impl std::error::Error for BrokerError {}
