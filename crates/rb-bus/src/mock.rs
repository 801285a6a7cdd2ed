//! In-memory transport doubles for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::codec::{Codec, CodecError, JsonCodec};
use rb_transport::{QueueClient, RawQueueMessage, Result as TransportResult, TopicPublisher};

/// A publish recorded by [`MockTopicPublisher`].
#[derive(Debug, Clone)]
pub struct RecordedPublish {
    pub body: String,
    pub type_name: String,
    pub attributes: HashMap<String, String>,
}

/// Records publishes instead of talking to a topic service.
#[derive(Default)]
pub struct MockTopicPublisher {
    pub registered: Mutex<Vec<String>>,
    pub published: Mutex<Vec<RecordedPublish>>,
}

impl MockTopicPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn publish_count(&self) -> usize {
        self.published.lock().len()
    }
}

#[async_trait]
impl TopicPublisher for MockTopicPublisher {
    async fn register_topics(&self, type_names: &[String]) -> TransportResult<()> {
        self.registered.lock().extend(type_names.iter().cloned());
        Ok(())
    }

    async fn publish(
        &self,
        body: &str,
        type_name: &str,
        attributes: HashMap<String, String>,
    ) -> TransportResult<()> {
        self.published.lock().push(RecordedPublish {
            body: body.to_string(),
            type_name: type_name.to_string(),
            attributes,
        });
        Ok(())
    }
}

/// In-memory input queue. Deliveries are seeded with [`push_raw`];
/// deletes, local enqueues, and subscriptions are recorded.
///
/// [`push_raw`]: MockQueueClient::push_raw
pub struct MockQueueClient {
    address: String,
    pub deliveries: Mutex<VecDeque<RawQueueMessage>>,
    pub deleted: Mutex<Vec<String>>,
    pub enqueued: Mutex<Vec<String>>,
    pub subscribed: Mutex<Vec<String>>,
}

impl MockQueueClient {
    pub fn new(address: &str) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            deliveries: Mutex::new(VecDeque::new()),
            deleted: Mutex::new(Vec::new()),
            enqueued: Mutex::new(Vec::new()),
            subscribed: Mutex::new(Vec::new()),
        })
    }

    /// Seed a delivery.
    pub fn push_raw(&self, receipt_handle: &str, body: &str, receive_count: u32) {
        self.deliveries.lock().push_back(RawQueueMessage {
            receipt_handle: receipt_handle.to_string(),
            body: body.to_string(),
            receive_count,
        });
    }

    pub fn delete_count(&self) -> usize {
        self.deleted.lock().len()
    }
}

#[async_trait]
impl QueueClient for MockQueueClient {
    fn address(&self) -> &str {
        &self.address
    }

    async fn receive(&self) -> TransportResult<Vec<RawQueueMessage>> {
        let mut deliveries = self.deliveries.lock();
        let take = deliveries.len().min(10);
        Ok(deliveries.drain(..take).collect())
    }

    async fn delete(&self, receipt_handle: &str) -> TransportResult<()> {
        self.deleted.lock().push(receipt_handle.to_string());
        Ok(())
    }

    async fn enqueue(&self, body: &str) -> TransportResult<()> {
        self.enqueued.lock().push(body.to_string());
        Ok(())
    }

    async fn subscribe(&self, type_names: &[String]) -> TransportResult<()> {
        self.subscribed.lock().extend(type_names.iter().cloned());
        Ok(())
    }
}

/// JSON codec that counts calls; rollback tests assert the encode count
/// stays at zero.
#[derive(Default)]
pub struct CountingCodec {
    inner: JsonCodec,
    encodes: AtomicUsize,
    decodes: AtomicUsize,
}

impl CountingCodec {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn encode_count(&self) -> usize {
        self.encodes.load(Ordering::SeqCst)
    }

    pub fn decode_count(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }
}

impl Codec for CountingCodec {
    fn encode(&self, value: &serde_json::Value) -> Result<String, CodecError> {
        self.encodes.fetch_add(1, Ordering::SeqCst);
        self.inner.encode(value)
    }

    fn decode(&self, raw: &str) -> Result<serde_json::Value, CodecError> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        self.inner.decode(raw)
    }
}
