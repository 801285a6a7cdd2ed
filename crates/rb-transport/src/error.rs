use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("AWS SNS error: {0}")]
    Sns(String),

    #[error("AWS SQS error: {0}")]
    Sqs(String),

    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("queue not found: {0}")]
    QueueNotFound(String),
}
