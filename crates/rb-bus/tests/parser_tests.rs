//! MessageParser tests
//!
//! Tests for:
//! - Envelope extraction and type resolution
//! - Retry count handling
//! - Failure paths keeping the receipt handle

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use rb_bus::{BusMessage, JsonCodec, MessageParser, ProcessingError, RawQueueMessage, TypeRegistry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TestMessage {
    name: String,
}

impl BusMessage for TestMessage {
    const TYPE_NAME: &'static str = "Tests.Messages.TestMessage";
}

fn parser() -> MessageParser {
    let mut types = TypeRegistry::default();
    types.register::<TestMessage>();
    MessageParser::new(Arc::new(types), Arc::new(JsonCodec))
}

fn envelope(type_name: &str, payload: &str) -> String {
    serde_json::json!({
        "Type": "Notification",
        "Message": payload,
        "MessageAttributes": {
            "messageType": { "Value": type_name, "Type": "String" },
            "fromSns": { "Value": "True", "Type": "String" }
        }
    })
    .to_string()
}

fn raw(body: &str, receive_count: u32) -> RawQueueMessage {
    RawQueueMessage {
        receipt_handle: "receipt-1".to_string(),
        body: body.to_string(),
        receive_count,
    }
}

#[test]
fn parses_valid_envelope() {
    let body = envelope(TestMessage::TYPE_NAME, "{\"name\":\"A\"}");
    let message = parser().parse(raw(&body, 1));

    assert!(message.parsing_succeeded);
    assert!(message.parse_error.is_none());
    assert_eq!(message.message_type_name, TestMessage::TYPE_NAME);
    assert_eq!(message.retry_count, 1);
    assert_eq!(message.receipt_handle, "receipt-1");
    assert_eq!(message.body, "{\"name\":\"A\"}");

    let payload = message.payload::<TestMessage>().unwrap();
    assert_eq!(payload.name, "A");
}

#[test]
fn unresolvable_type_fails_with_unknown_type_error() {
    let body = envelope("nonexistent.Type", "{}");
    let message = parser().parse(raw(&body, 1));

    assert!(!message.parsing_succeeded);
    assert!(message.message.is_none());
    assert!(message.message_type.is_none());
    assert_eq!(message.message_type_name, "nonexistent.Type");
    assert_eq!(message.receipt_handle, "receipt-1");

    let error = message.parse_error.unwrap();
    assert!(matches!(error, ProcessingError::UnknownMessageType(_)));
    assert_eq!(
        error.to_string(),
        "unable to find message type nonexistent.Type"
    );
}

#[test]
fn malformed_envelope_fails_with_parse_error() {
    let message = parser().parse(raw("this is not an envelope", 2));

    assert!(!message.parsing_succeeded);
    assert_eq!(message.receipt_handle, "receipt-1");
    assert_eq!(message.retry_count, 2);
    assert!(matches!(
        message.parse_error,
        Some(ProcessingError::Parse(_))
    ));
}

#[test]
fn missing_message_type_attribute_fails() {
    let body = serde_json::json!({
        "Message": "{}",
        "MessageAttributes": {}
    })
    .to_string();
    let message = parser().parse(raw(&body, 1));

    assert!(!message.parsing_succeeded);
    let error = message.parse_error.unwrap().to_string();
    assert!(error.contains("messageType"));
}

#[test]
fn payload_decode_failure_fails_with_parse_error() {
    let body = envelope(TestMessage::TYPE_NAME, "{\"name\":42}");
    let message = parser().parse(raw(&body, 1));

    assert!(!message.parsing_succeeded);
    assert!(message.message.is_none());
    let error = message.parse_error.unwrap().to_string();
    assert!(error.contains(TestMessage::TYPE_NAME));
}

#[test]
fn retry_count_is_at_least_one() {
    let body = envelope(TestMessage::TYPE_NAME, "{\"name\":\"A\"}");

    let message = parser().parse(raw(&body, 0));
    assert_eq!(message.retry_count, 1);

    let message = parser().parse(raw(&body, 5));
    assert_eq!(message.retry_count, 5);
}
