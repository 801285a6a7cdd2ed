use async_trait::async_trait;
use aws_sdk_sns::types::MessageAttributeValue;
use aws_sdk_sns::Client;
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::{Result, TopicPublisher, TransportError};
use rb_common::{topic_name, ATTR_FROM_SNS, ATTR_MESSAGE_TYPE};

/// AWS SNS topic publisher
///
/// Keeps a lazy topic cache (topic name to ARN). Entries are populated on
/// registration or first publish and live for the process lifetime.
pub struct SnsTopicPublisher {
    client: Client,
    topics: DashMap<String, String>,
}

impl SnsTopicPublisher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            topics: DashMap::new(),
        }
    }

    /// Create a publisher against the default AWS configuration chain.
    pub async fn connect() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config))
    }

    /// Create the topic if missing and cache its ARN. Topic creation is
    /// idempotent on SNS, so this doubles as a lookup for existing topics.
    async fn ensure_topic(&self, topic: &str) -> Result<String> {
        if let Some(arn) = self.topics.get(topic) {
            return Ok(arn.clone());
        }

        let created = self
            .client
            .create_topic()
            .name(topic)
            .send()
            .await
            .map_err(|e| TransportError::Sns(e.to_string()))?;

        let arn = created
            .topic_arn()
            .ok_or_else(|| TransportError::Sns(format!("no ARN returned for topic {topic}")))?
            .to_string();

        info!(topic = %topic, arn = %arn, "Topic registered");
        self.topics.insert(topic.to_string(), arn.clone());
        Ok(arn)
    }

    /// Look up an existing topic by name without creating one.
    async fn find_topic(&self, topic: &str) -> Result<Option<String>> {
        let suffix = format!(":{topic}");
        let mut next_token: Option<String> = None;

        loop {
            let mut request = self.client.list_topics();
            if let Some(token) = next_token {
                request = request.next_token(token);
            }
            let page = request
                .send()
                .await
                .map_err(|e| TransportError::Sns(e.to_string()))?;

            for entry in page.topics() {
                if let Some(arn) = entry.topic_arn() {
                    if arn.ends_with(&suffix) {
                        return Ok(Some(arn.to_string()));
                    }
                }
            }

            next_token = page.next_token().map(|s| s.to_string());
            if next_token.is_none() {
                return Ok(None);
            }
        }
    }
}

#[async_trait]
impl TopicPublisher for SnsTopicPublisher {
    async fn register_topics(&self, type_names: &[String]) -> Result<()> {
        for type_name in type_names {
            self.ensure_topic(&topic_name(type_name)).await?;
        }
        Ok(())
    }

    async fn publish(
        &self,
        body: &str,
        type_name: &str,
        attributes: HashMap<String, String>,
    ) -> Result<()> {
        let topic = topic_name(type_name);

        let arn = match self.topics.get(&topic).map(|entry| entry.clone()) {
            Some(arn) => arn,
            None => match self.find_topic(&topic).await? {
                Some(arn) => {
                    self.topics.insert(topic.clone(), arn.clone());
                    arn
                }
                None => return Err(TransportError::UnknownTopic(topic)),
            },
        };

        let mut request = self.client.publish().topic_arn(&arn).message(body);

        for (name, value) in &attributes {
            request = request.message_attributes(name, string_attribute(value)?);
        }
        request = request
            .message_attributes(ATTR_MESSAGE_TYPE, string_attribute(type_name)?)
            .message_attributes(ATTR_FROM_SNS, string_attribute("True")?);

        request
            .send()
            .await
            .map_err(|e| TransportError::Sns(e.to_string()))?;

        debug!(topic = %topic, message_type = %type_name, "Message published");
        Ok(())
    }
}

fn string_attribute(value: &str) -> Result<MessageAttributeValue> {
    MessageAttributeValue::builder()
        .data_type("String")
        .string_value(value)
        .build()
        .map_err(|e| TransportError::Sns(e.to_string()))
}
