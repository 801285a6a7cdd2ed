use async_trait::async_trait;
use std::collections::HashMap;

pub mod error;
pub mod sns;
pub mod sqs;

pub use error::TransportError;
pub use sns::SnsTopicPublisher;
pub use sqs::SqsQueueClient;

pub type Result<T> = std::result::Result<T, TransportError>;

/// A message pulled off the input queue before envelope parsing.
#[derive(Debug, Clone)]
pub struct RawQueueMessage {
    /// Token authorizing deletion of this delivery.
    pub receipt_handle: String,
    /// Raw queue body (the wire envelope).
    pub body: String,
    /// Provider-reported approximate delivery count, at least 1.
    pub receive_count: u32,
}

/// Publishes serialized payloads to the fan-out topic derived from each
/// message type.
#[async_trait]
pub trait TopicPublisher: Send + Sync {
    /// Ensure a topic exists for each declared publishable type and cache
    /// its id.
    async fn register_topics(&self, type_names: &[String]) -> Result<()>;

    /// Publish a serialized payload with attributes to the topic for
    /// `type_name`. The implementation adds the `messageType` and
    /// `fromSns` attributes on top of the caller's.
    async fn publish(
        &self,
        body: &str,
        type_name: &str,
        attributes: HashMap<String, String>,
    ) -> Result<()>;
}

/// The consumer-owned input queue.
///
/// Implementations must tolerate concurrent `receive` and `delete` calls;
/// every pump of a bus shares one client.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Stable identifier of the queue, used as the `sender` attribute.
    fn address(&self) -> &str;

    /// Long-poll the queue. Returns an empty batch on timeout rather than
    /// raising.
    async fn receive(&self) -> Result<Vec<RawQueueMessage>>;

    /// Acknowledge a delivery.
    async fn delete(&self, receipt_handle: &str) -> Result<()>;

    /// Push a locally-built envelope directly onto this queue.
    async fn enqueue(&self, body: &str) -> Result<()>;

    /// Bind this queue to the topic of each message type.
    async fn subscribe(&self, type_names: &[String]) -> Result<()>;
}
