use tracing::{info, warn};

use rb_common::TransportMessage;

/// Observes message lifecycle events inside the pump.
pub trait MessageLogger: Send + Sync {
    fn received(&self, message: &TransportMessage);
    fn completed(&self, message: &TransportMessage);
    fn retried(&self, message: &TransportMessage);
    fn dead_lettered(&self, message: &TransportMessage);
}

/// Default logger emitting structured tracing lines.
pub struct TracingMessageLogger;

impl MessageLogger for TracingMessageLogger {
    fn received(&self, message: &TransportMessage) {
        info!(
            message_type = %message.message_type_name,
            retry_count = message.retry_count,
            "Message received"
        );
    }

    fn completed(&self, message: &TransportMessage) {
        info!(message_type = %message.message_type_name, "Message processed");
    }

    fn retried(&self, message: &TransportMessage) {
        warn!(
            message_type = %message.message_type_name,
            retry_count = message.retry_count,
            "Message left for retry"
        );
    }

    fn dead_lettered(&self, message: &TransportMessage) {
        warn!(
            message_type = %message.message_type_name,
            retry_count = message.retry_count,
            "Message dead-lettered"
        );
    }
}
