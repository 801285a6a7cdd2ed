//! TransactionalBus tests
//!
//! Tests for:
//! - Buffered sends flushing on commit in insertion order
//! - Rollback discarding the buffer without serializing
//! - Transaction independence
//! - Local publish bypassing the topic
//! - The sender attribute rule

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rb_bus::mock::{CountingCodec, MockQueueClient, MockTopicPublisher};
use rb_bus::{BusBuilder, BusMessage, PublishError, SendBus, TransactionContext};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TestMessage {
    name: String,
}

impl BusMessage for TestMessage {
    const TYPE_NAME: &'static str = "Tests.Messages.TestMessage";
}

async fn send_bus(
    codec: Arc<CountingCodec>,
    publisher: Arc<MockTopicPublisher>,
    queue: Option<Arc<MockQueueClient>>,
) -> SendBus {
    let mut builder = BusBuilder::new().codec(codec).topic_publisher(publisher);
    if let Some(queue) = queue {
        builder = builder.input_queue(queue);
    }
    builder.build_send_only().await.unwrap().create()
}

#[tokio::test]
async fn commit_publishes_buffered_sends_in_order() {
    let codec = CountingCodec::new();
    let publisher = MockTopicPublisher::new();
    let queue = MockQueueClient::new("QueueName");
    let bus = send_bus(codec.clone(), publisher.clone(), Some(queue.clone())).await;

    let txn = TransactionContext::new();
    let tx_bus = bus.with_transaction(txn.clone());

    tx_bus
        .publish(TestMessage { name: "A".to_string() })
        .await
        .unwrap();
    tx_bus
        .publish(TestMessage { name: "B".to_string() })
        .await
        .unwrap();

    // Nothing serialized or published until commit.
    assert_eq!(codec.encode_count(), 0);
    assert_eq!(publisher.publish_count(), 0);
    assert_eq!(txn.pending_count(), 2);

    bus.commit(txn).await.unwrap();

    assert_eq!(codec.encode_count(), 2);
    let published = publisher.published.lock();
    assert_eq!(published.len(), 2);
    assert!(published[0].body.contains("\"A\""));
    assert!(published[1].body.contains("\"B\""));
    for publish in published.iter() {
        assert_eq!(publish.type_name, TestMessage::TYPE_NAME);
        assert_eq!(
            publish.attributes.get("sender").map(String::as_str),
            Some("QueueName")
        );
    }
}

#[tokio::test]
async fn rollback_publishes_nothing() {
    let codec = CountingCodec::new();
    let publisher = MockTopicPublisher::new();
    let queue = MockQueueClient::new("QueueName");
    let bus = send_bus(codec.clone(), publisher.clone(), Some(queue)).await;

    let txn = TransactionContext::new();
    let tx_bus = bus.with_transaction(txn.clone());

    let built = Arc::new(AtomicBool::new(false));
    let built_flag = built.clone();

    tx_bus
        .publish(TestMessage { name: "A".to_string() })
        .await
        .unwrap();
    tx_bus
        .publish_with(move || {
            built_flag.store(true, Ordering::SeqCst);
            TestMessage { name: "B".to_string() }
        })
        .await
        .unwrap();

    txn.discard();

    assert_eq!(codec.encode_count(), 0);
    assert_eq!(publisher.publish_count(), 0);
    assert!(
        !built.load(Ordering::SeqCst),
        "builder closures must not run on rollback"
    );
}

#[tokio::test]
async fn rollback_then_commit_are_independent() {
    let codec = CountingCodec::new();
    let publisher = MockTopicPublisher::new();
    let queue = MockQueueClient::new("QueueName");
    let bus = send_bus(codec.clone(), publisher.clone(), Some(queue)).await;

    let rolled_back = TransactionContext::new();
    let tx_bus = bus.with_transaction(rolled_back.clone());
    tx_bus
        .publish(TestMessage { name: "A".to_string() })
        .await
        .unwrap();
    tx_bus
        .publish(TestMessage { name: "B".to_string() })
        .await
        .unwrap();
    rolled_back.discard();

    let committed = TransactionContext::new();
    let tx_bus = bus.with_transaction(committed.clone());
    tx_bus
        .publish(TestMessage { name: "C".to_string() })
        .await
        .unwrap();
    tx_bus
        .publish(TestMessage { name: "D".to_string() })
        .await
        .unwrap();
    bus.commit(committed).await.unwrap();

    let published = publisher.published.lock();
    assert_eq!(published.len(), 2);
    assert!(published[0].body.contains("\"C\""));
    assert!(published[1].body.contains("\"D\""));
}

#[tokio::test]
async fn local_publish_bypasses_topic() {
    let codec = CountingCodec::new();
    let publisher = MockTopicPublisher::new();
    let queue = MockQueueClient::new("QueueName");
    let bus = send_bus(codec, publisher.clone(), Some(queue.clone())).await;

    bus.publish_local(TestMessage { name: "X".to_string() })
        .await
        .unwrap();

    assert_eq!(publisher.publish_count(), 0);
    let enqueued = queue.enqueued.lock();
    assert_eq!(enqueued.len(), 1);

    let envelope: serde_json::Value = serde_json::from_str(&enqueued[0]).unwrap();
    assert_eq!(
        envelope["MessageAttributes"]["messageType"]["Value"],
        TestMessage::TYPE_NAME
    );
    assert_eq!(envelope["MessageAttributes"]["sender"]["Value"], "QueueName");

    let payload: TestMessage =
        serde_json::from_str(envelope["Message"].as_str().unwrap()).unwrap();
    assert_eq!(payload.name, "X");
}

#[tokio::test]
async fn transactional_local_send_flushes_on_commit() {
    let codec = CountingCodec::new();
    let publisher = MockTopicPublisher::new();
    let queue = MockQueueClient::new("QueueName");
    let bus = send_bus(codec.clone(), publisher, Some(queue.clone())).await;

    let txn = TransactionContext::new();
    let tx_bus = bus.with_transaction(txn.clone());
    tx_bus
        .publish_local(TestMessage { name: "L".to_string() })
        .await
        .unwrap();

    assert_eq!(queue.enqueued.lock().len(), 0);
    assert_eq!(codec.encode_count(), 0);

    bus.commit(txn).await.unwrap();

    assert_eq!(queue.enqueued.lock().len(), 1);
    assert_eq!(codec.encode_count(), 1);
}

#[tokio::test]
async fn sender_attribute_omitted_without_queue() {
    let codec = CountingCodec::new();
    let publisher = MockTopicPublisher::new();
    let bus = send_bus(codec, publisher.clone(), None).await;

    bus.publish(TestMessage { name: "A".to_string() })
        .await
        .unwrap();

    let published = publisher.published.lock();
    assert_eq!(published.len(), 1);
    assert!(!published[0].attributes.contains_key("sender"));
}

#[tokio::test]
async fn publish_without_publisher_fails() {
    let queue = MockQueueClient::new("QueueName");
    let factory = BusBuilder::new()
        .input_queue(queue)
        .build_send_only()
        .await
        .unwrap();
    let bus = factory.create();

    let err = bus
        .publish(TestMessage { name: "A".to_string() })
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::NoPublisher));
}

#[tokio::test]
async fn local_publish_without_queue_fails() {
    let publisher = MockTopicPublisher::new();
    let factory = BusBuilder::new()
        .topic_publisher(publisher)
        .build_send_only()
        .await
        .unwrap();
    let bus = factory.create();

    let err = bus
        .publish_local(TestMessage { name: "A".to_string() })
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::NoLocalQueue));
}
