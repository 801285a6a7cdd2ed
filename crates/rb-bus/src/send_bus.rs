use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::codec::{encode_message, Codec, CodecError};
use crate::error::PublishError;
use crate::transaction::{OutboundMode, PendingOutbound, TransactionContext};
use rb_common::{BusMessage, Envelope, EnvelopeAttribute, ATTR_MESSAGE_TYPE, ATTR_SENDER};
use rb_transport::{QueueClient, TopicPublisher};

/// Client-facing publish surface.
///
/// Cheap to clone; clones share the codec and transport clients. A clone
/// bound to a [`TransactionContext`] buffers its sends instead of
/// dispatching them immediately.
#[derive(Clone)]
pub struct SendBus {
    inner: Arc<SendBusInner>,
    transaction: Option<Arc<TransactionContext>>,
}

struct SendBusInner {
    codec: Arc<dyn Codec>,
    publisher: Option<Arc<dyn TopicPublisher>>,
    queue: Option<Arc<dyn QueueClient>>,
}

impl SendBus {
    pub(crate) fn new(
        codec: Arc<dyn Codec>,
        publisher: Option<Arc<dyn TopicPublisher>>,
        queue: Option<Arc<dyn QueueClient>>,
    ) -> Self {
        Self {
            inner: Arc::new(SendBusInner {
                codec,
                publisher,
                queue,
            }),
            transaction: None,
        }
    }

    /// A clone of this bus bound to `transaction`.
    pub fn with_transaction(&self, transaction: Arc<TransactionContext>) -> Self {
        Self {
            inner: self.inner.clone(),
            transaction: Some(transaction),
        }
    }

    /// Publish a message to its topic.
    pub async fn publish<M: BusMessage>(&self, message: M) -> Result<(), PublishError> {
        self.publish_with(move || message).await
    }

    /// Publish a message built lazily. Under a bound transaction the
    /// builder is not invoked (and nothing is serialized) until commit.
    pub async fn publish_with<M, F>(&self, build: F) -> Result<(), PublishError>
    where
        M: BusMessage,
        F: FnOnce() -> M + Send + 'static,
    {
        if let Some(transaction) = &self.transaction {
            transaction.enlist(PendingOutbound {
                mode: OutboundMode::Publish,
                type_name: M::TYPE_NAME,
                build: Box::new(move |codec| encode_message(codec, &build())),
            });
            debug!(message_type = M::TYPE_NAME, "Publish enlisted on transaction");
            return Ok(());
        }

        let body = encode_message(self.inner.codec.as_ref(), &build())?;
        self.publish_body(&body, M::TYPE_NAME).await
    }

    /// Enqueue a message directly on the owning queue, bypassing the
    /// topic.
    pub async fn publish_local<M: BusMessage>(&self, message: M) -> Result<(), PublishError> {
        self.publish_local_with(move || message).await
    }

    pub async fn publish_local_with<M, F>(&self, build: F) -> Result<(), PublishError>
    where
        M: BusMessage,
        F: FnOnce() -> M + Send + 'static,
    {
        let Some(queue) = &self.inner.queue else {
            return Err(PublishError::NoLocalQueue);
        };

        if let Some(transaction) = &self.transaction {
            let sender = queue.address().to_string();
            transaction.enlist(PendingOutbound {
                mode: OutboundMode::SendLocal,
                type_name: M::TYPE_NAME,
                build: Box::new(move |codec| local_envelope(codec, &build(), &sender)),
            });
            debug!(message_type = M::TYPE_NAME, "Local send enlisted on transaction");
            return Ok(());
        }

        let envelope = local_envelope(self.inner.codec.as_ref(), &build(), queue.address())?;
        queue.enqueue(&envelope).await?;
        debug!(message_type = M::TYPE_NAME, "Message enqueued on local queue");
        Ok(())
    }

    /// Flush a transaction's buffered sends in insertion order. Each entry
    /// is built and serialized only here.
    pub async fn commit(&self, transaction: Arc<TransactionContext>) -> Result<(), PublishError> {
        for pending in transaction.take_pending() {
            let body = (pending.build)(self.inner.codec.as_ref())?;
            match pending.mode {
                OutboundMode::Publish => self.publish_body(&body, pending.type_name).await?,
                OutboundMode::SendLocal => {
                    let Some(queue) = &self.inner.queue else {
                        return Err(PublishError::NoLocalQueue);
                    };
                    queue.enqueue(&body).await?;
                }
            }
        }
        Ok(())
    }

    async fn publish_body(&self, body: &str, type_name: &'static str) -> Result<(), PublishError> {
        let Some(publisher) = &self.inner.publisher else {
            return Err(PublishError::NoPublisher);
        };

        // The sender attribute is only present when this bus owns a queue.
        let mut attributes = HashMap::new();
        if let Some(queue) = &self.inner.queue {
            attributes.insert(ATTR_SENDER.to_string(), queue.address().to_string());
        }

        publisher.publish(body, type_name, attributes).await?;
        Ok(())
    }
}

/// Wrap a payload in the standard envelope for direct enqueue. Locally
/// sent messages skip the topic service, so the envelope is built here.
fn local_envelope<M: BusMessage>(
    codec: &dyn Codec,
    message: &M,
    sender: &str,
) -> Result<String, CodecError> {
    let body = encode_message(codec, message)?;

    let mut attributes = HashMap::new();
    attributes.insert(
        ATTR_MESSAGE_TYPE.to_string(),
        EnvelopeAttribute::string(M::TYPE_NAME),
    );
    attributes.insert(ATTR_SENDER.to_string(), EnvelopeAttribute::string(sender));

    let envelope = Envelope {
        kind: None,
        message_id: Some(Uuid::new_v4().to_string()),
        topic_arn: None,
        message: body,
        message_attributes: attributes,
    };

    serde_json::to_string(&envelope).map_err(|e| CodecError::Serialize(e.to_string()))
}
