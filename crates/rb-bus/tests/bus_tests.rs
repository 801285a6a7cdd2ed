//! Bus assembly tests
//!
//! Tests for:
//! - Builder validation
//! - Topic registration and queue subscription on build
//! - End-to-end receive across multiple pumps with stop/join

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use rb_bus::mock::{MockQueueClient, MockTopicPublisher};
use rb_bus::{BusBuilder, BusConfig, BusConfigError, BusMessage, MessageHandler};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TestMessage {
    name: String,
}

impl BusMessage for TestMessage {
    const TYPE_NAME: &'static str = "Tests.Messages.TestMessage";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OutboundEvent {
    name: String,
}

impl BusMessage for OutboundEvent {
    const TYPE_NAME: &'static str = "Tests.Messages.OutboundEvent";
}

struct RecordingHandler {
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl MessageHandler<TestMessage> for RecordingHandler {
    async fn handle(&self, message: &TestMessage) -> anyhow::Result<()> {
        self.calls.lock().push(message.name.clone());
        Ok(())
    }
}

fn envelope(name: &str) -> String {
    serde_json::json!({
        "Message": format!("{{\"name\":\"{name}\"}}"),
        "MessageAttributes": {
            "messageType": { "Value": TestMessage::TYPE_NAME, "Type": "String" }
        }
    })
    .to_string()
}

#[tokio::test]
async fn build_requires_an_input_queue() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let err = BusBuilder::new()
        .handle::<TestMessage, RecordingHandler, _>(move |_ctx| RecordingHandler {
            calls: calls.clone(),
        })
        .build()
        .await
        .unwrap_err();

    assert!(matches!(err, BusConfigError::Invalid(_)));
    assert!(err.to_string().contains("input queue"));
}

#[tokio::test]
async fn build_requires_at_least_one_handler() {
    let err = BusBuilder::new()
        .input_queue(MockQueueClient::new("TestQueue"))
        .build()
        .await
        .unwrap_err();

    assert!(matches!(err, BusConfigError::Invalid(_)));
    assert!(err.to_string().contains("handler"));
}

#[tokio::test]
async fn build_rejects_zero_polling_instances() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let config = BusConfig {
        number_of_polling_instances: 0,
        ..Default::default()
    };
    let err = BusBuilder::with_config(config)
        .input_queue(MockQueueClient::new("TestQueue"))
        .handle::<TestMessage, RecordingHandler, _>(move |_ctx| RecordingHandler {
            calls: calls.clone(),
        })
        .build()
        .await
        .unwrap_err();

    assert!(err.to_string().contains("number_of_polling_instances"));
}

#[tokio::test]
async fn build_subscribes_queue_and_registers_publish_topics() {
    let queue = MockQueueClient::new("TestQueue");
    let publisher = MockTopicPublisher::new();
    let calls = Arc::new(Mutex::new(Vec::new()));

    BusBuilder::new()
        .input_queue(queue.clone())
        .topic_publisher(publisher.clone())
        .publishes::<OutboundEvent>()
        .handle::<TestMessage, RecordingHandler, _>(move |_ctx| RecordingHandler {
            calls: calls.clone(),
        })
        .build()
        .await
        .unwrap();

    assert_eq!(*queue.subscribed.lock(), [TestMessage::TYPE_NAME]);
    assert_eq!(*publisher.registered.lock(), [OutboundEvent::TYPE_NAME]);
}

#[tokio::test]
async fn receives_across_pumps_and_stops_cleanly() {
    let queue = MockQueueClient::new("TestQueue");
    let calls = Arc::new(Mutex::new(Vec::new()));
    let handler_calls = calls.clone();

    let config = BusConfig {
        number_of_polling_instances: 2,
        empty_receive_backoff_ms: 5,
        ..Default::default()
    };
    let bus = BusBuilder::with_config(config)
        .input_queue(queue.clone())
        .handle::<TestMessage, RecordingHandler, _>(move |_ctx| RecordingHandler {
            calls: handler_calls.clone(),
        })
        .build()
        .await
        .unwrap();

    queue.push_raw("receipt-1", &envelope("one"), 1);
    queue.push_raw("receipt-2", &envelope("two"), 1);
    queue.push_raw("receipt-3", &envelope("three"), 1);

    bus.start_receiving();
    tokio::time::sleep(Duration::from_millis(200)).await;
    bus.stop_receiving().await;

    let mut handled = calls.lock().clone();
    handled.sort();
    assert_eq!(handled, ["one", "three", "two"]);
    assert_eq!(queue.delete_count(), 3);
}

#[tokio::test]
async fn send_bus_from_receiving_bus_carries_sender() {
    let queue = MockQueueClient::new("TestQueue");
    let publisher = MockTopicPublisher::new();
    let calls = Arc::new(Mutex::new(Vec::new()));

    let bus = BusBuilder::new()
        .input_queue(queue)
        .topic_publisher(publisher.clone())
        .handle::<TestMessage, RecordingHandler, _>(move |_ctx| RecordingHandler {
            calls: calls.clone(),
        })
        .build()
        .await
        .unwrap();

    let send_bus = bus.create_send_bus();
    send_bus
        .publish(OutboundEvent {
            name: "E".to_string(),
        })
        .await
        .unwrap();

    let published = publisher.published.lock();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].type_name, OutboundEvent::TYPE_NAME);
    assert_eq!(
        published[0].attributes.get("sender").map(String::as_str),
        Some("TestQueue")
    );
}
