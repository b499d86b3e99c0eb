//! Message and delivery types exchanged with the broker.

use std::fmt;

/// Broker-assigned handle correlating a delivery with its ack or nack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(pub u64);

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message body plus the properties a receiver typically looks at.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
    /// Application-assigned identifier, if any
    pub message_id: Option<String>,
    /// MIME-like content type of the body
    pub content_type: Option<String>,
    /// Free-form string headers
    pub headers: Vec<(String, String)>,
    /// Raw body bytes
    pub body: Vec<u8>,
}

impl Message {
    /// Create a message with the given body.
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            ..Self::default()
        }
    }

    /// Create a message with a UTF-8 text body.
    pub fn text(body: impl Into<String>) -> Self {
        Self::new(body.into().into_bytes()).with_content_type("text/plain")
    }

    /// Create a message whose body is the bitcode encoding of `value`.
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Self, bitcode::Error> {
        let bytes = bitcode::serialize(value)?;
        Ok(Self::new(bytes).with_content_type("application/x-bitcode"))
    }

    /// Decode the body from bitcode binary format.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, bitcode::Error> {
        bitcode::deserialize(&self.body)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Look up the first header with the given key.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Get the body as a string (if valid UTF-8).
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// One message handed to a consumer by the broker.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub tag: DeliveryTag,
    /// Set when the broker has offered this message before
    pub redelivered: bool,
    pub message: Message,
}

impl Delivery {
    pub fn new(tag: DeliveryTag, message: Message) -> Self {
        Self {
            tag,
            redelivered: false,
            message,
        }
    }
}
