use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod logging;

// ============================================================================
// Message Contract
// ============================================================================

/// Implemented by every payload type that travels over the bus.
///
/// `TYPE_NAME` is the fully-qualified logical type name carried in the
/// `messageType` wire attribute. Both ends of the wire must agree on it;
/// the receiving side resolves it through its type registry.
pub trait BusMessage: Serialize + DeserializeOwned + Any + Send + Sync + 'static {
    const TYPE_NAME: &'static str;
}

/// Decoded payload shared across the handler set of one dispatch.
pub type AnyPayload = Arc<dyn Any + Send + Sync>;

/// Derives the topic name for a message type name.
///
/// Dots are not valid in topic names, so the fully-qualified name is
/// flattened with underscores. Publisher and subscriber both use this
/// function so subscriptions line up.
pub fn topic_name(type_name: &str) -> String {
    type_name.replace('.', "_")
}

// ============================================================================
// Wire Envelope
// ============================================================================

/// Envelope attribute carrying the fully-qualified message type name.
pub const ATTR_MESSAGE_TYPE: &str = "messageType";
/// Envelope attribute carrying the originating queue address.
pub const ATTR_SENDER: &str = "sender";
/// Envelope attribute marking topic-originated messages.
pub const ATTR_FROM_SNS: &str = "fromSns";

/// Outer document wrapped around a payload when the topic service forwards
/// it to a queue. Locally-enqueued messages use the same shape, minus the
/// topic metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(rename = "MessageId", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(rename = "TopicArn", default, skip_serializing_if = "Option::is_none")]
    pub topic_arn: Option<String>,
    /// The serialized payload.
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "MessageAttributes", default)]
    pub message_attributes: HashMap<String, EnvelopeAttribute>,
}

impl Envelope {
    /// Value of a named attribute, if present.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.message_attributes.get(name).map(|a| a.value.as_str())
    }
}

/// A single `{Value, Type}` pair inside the envelope attribute map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeAttribute {
    #[serde(rename = "Value")]
    pub value: String,
    #[serde(rename = "Type", default = "string_attribute_type")]
    pub data_type: String,
}

impl EnvelopeAttribute {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            data_type: string_attribute_type(),
        }
    }
}

fn string_attribute_type() -> String {
    "String".to_string()
}

// ============================================================================
// Processing Errors & Results
// ============================================================================

/// Failure that travels with a message through the parse/dispatch pipeline.
#[derive(Error, Debug, Clone)]
pub enum ProcessingError {
    #[error("unable to find message type {0}")]
    UnknownMessageType(String),

    #[error("failed to parse message: {0}")]
    Parse(String),

    #[error("no handler registered for {0}")]
    NoHandler(String),

    #[error("handler {handler} failed: {message}")]
    Handler { handler: String, message: String },

    #[error("outbound flush failed: {0}")]
    Flush(String),
}

/// Outcome of dispatching one message through its handler set.
#[derive(Debug, Clone)]
pub struct MessageProcessingResult {
    pub success: bool,
    pub error: Option<ProcessingError>,
}

impl MessageProcessingResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: ProcessingError) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }
}

// ============================================================================
// Transport Message
// ============================================================================

/// The unit moved between the wire and the dispatcher.
///
/// Lives from parse until acknowledgement (delete) or visibility timeout;
/// the dispatcher owns it for the duration of one dispatch.
#[derive(Clone)]
pub struct TransportMessage {
    /// Opaque server-side token required for acknowledgement. Always set
    /// for messages returned from the queue, including failed parses.
    pub receipt_handle: String,
    /// Provider-reported approximate delivery count, at least 1.
    pub retry_count: u32,
    /// Raw serialized payload string after the envelope has been stripped.
    pub body: String,
    /// Fully-qualified logical type identifier from the envelope attribute.
    pub message_type_name: String,
    /// Resolved concrete type. Absent if resolution failed.
    pub message_type: Option<TypeId>,
    /// Decoded payload instance. Absent if parsing failed.
    pub message: Option<AnyPayload>,
    pub parsing_succeeded: bool,
    pub parse_error: Option<ProcessingError>,
}

impl TransportMessage {
    /// Downcast the decoded payload to a concrete message type.
    pub fn payload<M: BusMessage>(&self) -> Option<&M> {
        self.message.as_ref().and_then(|p| p.downcast_ref::<M>())
    }
}

impl fmt::Debug for TransportMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportMessage")
            .field("receipt_handle", &self.receipt_handle)
            .field("retry_count", &self.retry_count)
            .field("message_type_name", &self.message_type_name)
            .field("parsing_succeeded", &self.parsing_succeeded)
            .field("parse_error", &self.parse_error)
            .finish()
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Scalar bus options. Typed registrations (handlers, codec, clients) are
/// supplied through the builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Number of independent polling pumps started by `start_receiving`.
    pub number_of_polling_instances: usize,
    /// Delivery attempts before a failing message is dead-lettered.
    pub message_retry_count: u32,
    /// Long-poll wait passed to the queue client, in seconds (SQS max 20).
    pub wait_time_seconds: i32,
    /// Pause after an empty receive before polling again, in milliseconds.
    pub empty_receive_backoff_ms: u64,
    /// Pause after a transport error on receive, in milliseconds.
    pub receive_error_backoff_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            number_of_polling_instances: 1,
            message_retry_count: 3,
            wait_time_seconds: 5,
            empty_receive_backoff_ms: 100,
            receive_error_backoff_ms: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_name_flattens_dots() {
        assert_eq!(topic_name("Shop.Messages.OrderPlaced"), "Shop_Messages_OrderPlaced");
        assert_eq!(topic_name("Plain"), "Plain");
    }

    #[test]
    fn topic_name_is_deterministic_per_type_name() {
        assert_eq!(topic_name("A.B"), topic_name("A.B"));
        assert_ne!(topic_name("A.B"), topic_name("A.C"));
    }

    #[test]
    fn envelope_round_trips() {
        let mut attributes = HashMap::new();
        attributes.insert(ATTR_MESSAGE_TYPE.to_string(), EnvelopeAttribute::string("Shop.OrderPlaced"));
        let envelope = Envelope {
            kind: Some("Notification".to_string()),
            message_id: None,
            topic_arn: None,
            message: "{\"name\":\"A\"}".to_string(),
            message_attributes: attributes,
        };

        let raw = serde_json::to_string(&envelope).unwrap();
        let parsed: Envelope = serde_json::from_str(&raw).unwrap();

        assert_eq!(parsed.message, envelope.message);
        assert_eq!(parsed.attribute(ATTR_MESSAGE_TYPE), Some("Shop.OrderPlaced"));
        assert_eq!(parsed.attribute(ATTR_SENDER), None);
    }

    #[test]
    fn envelope_attribute_type_defaults_to_string() {
        let raw = r#"{"Message":"x","MessageAttributes":{"messageType":{"Value":"A.B"}}}"#;
        let parsed: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.message_attributes[ATTR_MESSAGE_TYPE].data_type, "String");
    }

    #[test]
    fn default_config_values() {
        let config = BusConfig::default();
        assert_eq!(config.number_of_polling_instances, 1);
        assert_eq!(config.message_retry_count, 3);
        assert_eq!(config.wait_time_seconds, 5);
    }
}
