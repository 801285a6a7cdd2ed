use async_trait::async_trait;
use aws_sdk_sns::Client as SnsClient;
use aws_sdk_sqs::types::{MessageSystemAttributeName, QueueAttributeName};
use aws_sdk_sqs::Client as SqsClient;
use tracing::{debug, info, warn};

use crate::{QueueClient, RawQueueMessage, Result, TransportError};
use rb_common::topic_name;

/// AWS SQS input queue client
pub struct SqsQueueClient {
    sqs: SqsClient,
    sns: SnsClient,
    queue_name: String,
    queue_url: String,
    queue_arn: String,
    wait_time_seconds: i32,
}

impl SqsQueueClient {
    /// Default long poll wait time in seconds.
    /// 5 seconds balances efficiency with shutdown responsiveness.
    /// AWS SQS max is 20 seconds.
    pub const DEFAULT_WAIT_TIME_SECONDS: i32 = 5;

    pub fn new(
        sqs: SqsClient,
        sns: SnsClient,
        queue_name: String,
        queue_url: String,
        queue_arn: String,
    ) -> Self {
        Self {
            sqs,
            sns,
            queue_name,
            queue_url,
            queue_arn,
            wait_time_seconds: Self::DEFAULT_WAIT_TIME_SECONDS,
        }
    }

    /// Resolve URL and ARN for an existing queue by name.
    pub async fn from_queue_name(
        sqs: SqsClient,
        sns: SnsClient,
        queue_name: &str,
    ) -> Result<Self> {
        let url = sqs
            .get_queue_url()
            .queue_name(queue_name)
            .send()
            .await
            .map_err(|e| TransportError::QueueNotFound(format!("{queue_name}: {e}")))?
            .queue_url()
            .ok_or_else(|| TransportError::QueueNotFound(queue_name.to_string()))?
            .to_string();

        let attributes = sqs
            .get_queue_attributes()
            .queue_url(&url)
            .attribute_names(QueueAttributeName::QueueArn)
            .send()
            .await
            .map_err(|e| TransportError::Sqs(e.to_string()))?;

        let arn = attributes
            .attributes()
            .and_then(|a| a.get(&QueueAttributeName::QueueArn))
            .ok_or_else(|| TransportError::Sqs(format!("queue {queue_name} has no ARN attribute")))?
            .clone();

        Ok(Self::new(sqs, sns, queue_name.to_string(), url, arn))
    }

    /// Connect against the default AWS configuration chain.
    pub async fn connect(queue_name: &str) -> Result<Self> {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::from_queue_name(SqsClient::new(&config), SnsClient::new(&config), queue_name).await
    }

    /// Set the long poll wait time in seconds (max 20).
    /// Shorter times mean faster shutdown response but more API calls.
    pub fn with_wait_time_seconds(mut self, seconds: i32) -> Self {
        self.wait_time_seconds = seconds.clamp(0, 20);
        self
    }
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    fn address(&self) -> &str {
        &self.queue_name
    }

    async fn receive(&self) -> Result<Vec<RawQueueMessage>> {
        let result = self
            .sqs
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(10)
            .wait_time_seconds(self.wait_time_seconds)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| TransportError::Sqs(e.to_string()))?;

        let sqs_messages = result.messages.unwrap_or_default();
        let mut messages = Vec::with_capacity(sqs_messages.len());

        for sqs_msg in sqs_messages {
            let Some(receipt_handle) = sqs_msg.receipt_handle() else {
                warn!(queue = %self.queue_name, "Received message without receipt handle, skipping");
                continue;
            };

            let receive_count = sqs_msg
                .attributes()
                .and_then(|a| a.get(&MessageSystemAttributeName::ApproximateReceiveCount))
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(1)
                .max(1);

            messages.push(RawQueueMessage {
                receipt_handle: receipt_handle.to_string(),
                body: sqs_msg.body().unwrap_or_default().to_string(),
                receive_count,
            });
        }

        if !messages.is_empty() {
            debug!(queue = %self.queue_name, count = messages.len(), "Received messages");
        }

        Ok(messages)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.sqs
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| TransportError::Sqs(e.to_string()))?;

        debug!(queue = %self.queue_name, "Message deleted");
        Ok(())
    }

    async fn enqueue(&self, body: &str) -> Result<()> {
        self.sqs
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| TransportError::Sqs(e.to_string()))?;

        debug!(queue = %self.queue_name, "Message enqueued locally");
        Ok(())
    }

    async fn subscribe(&self, type_names: &[String]) -> Result<()> {
        for type_name in type_names {
            let topic = topic_name(type_name);

            let created = self
                .sns
                .create_topic()
                .name(&topic)
                .send()
                .await
                .map_err(|e| TransportError::Sns(e.to_string()))?;

            let topic_arn = created
                .topic_arn()
                .ok_or_else(|| TransportError::Sns(format!("no ARN returned for topic {topic}")))?;

            self.sns
                .subscribe()
                .topic_arn(topic_arn)
                .protocol("sqs")
                .endpoint(&self.queue_arn)
                .send()
                .await
                .map_err(|e| TransportError::Sns(e.to_string()))?;

            info!(queue = %self.queue_name, topic = %topic, "Queue subscribed to topic");
        }
        Ok(())
    }
}
