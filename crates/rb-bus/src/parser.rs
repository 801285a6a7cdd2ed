use std::sync::Arc;
use tracing::debug;

use crate::codec::Codec;
use crate::registry::TypeRegistry;
use rb_common::{Envelope, ProcessingError, TransportMessage, ATTR_MESSAGE_TYPE};
use rb_transport::RawQueueMessage;

/// Decodes raw queue deliveries into [`TransportMessage`]s.
#[derive(Clone)]
pub struct MessageParser {
    types: Arc<TypeRegistry>,
    codec: Arc<dyn Codec>,
}

impl MessageParser {
    pub fn new(types: Arc<TypeRegistry>, codec: Arc<dyn Codec>) -> Self {
        Self { types, codec }
    }

    /// Parse one delivery.
    ///
    /// Failures never lose the receipt handle; the pump still needs it to
    /// acknowledge or dead-letter the message.
    pub fn parse(&self, raw: RawQueueMessage) -> TransportMessage {
        let mut message = TransportMessage {
            receipt_handle: raw.receipt_handle,
            retry_count: raw.receive_count.max(1),
            body: raw.body,
            message_type_name: String::new(),
            message_type: None,
            message: None,
            parsing_succeeded: false,
            parse_error: None,
        };

        let envelope: Envelope = match serde_json::from_str(&message.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                message.parse_error =
                    Some(ProcessingError::Parse(format!("invalid envelope: {e}")));
                return message;
            }
        };

        let Some(type_name) = envelope.attribute(ATTR_MESSAGE_TYPE).map(str::to_string) else {
            message.parse_error = Some(ProcessingError::Parse(
                "envelope has no messageType attribute".to_string(),
            ));
            return message;
        };
        message.message_type_name = type_name;
        message.body = envelope.message;

        let Some(registered) = self.types.resolve(&message.message_type_name) else {
            message.parse_error = Some(ProcessingError::UnknownMessageType(
                message.message_type_name.clone(),
            ));
            return message;
        };

        match registered.decode(self.codec.as_ref(), &message.body) {
            Ok(payload) => {
                message.message_type = Some(registered.type_id);
                message.message = Some(payload);
                message.parsing_succeeded = true;
                debug!(message_type = %message.message_type_name, "Message parsed");
            }
            Err(e) => {
                message.parse_error = Some(ProcessingError::Parse(format!(
                    "failed to decode {}: {e}",
                    message.message_type_name
                )));
            }
        }

        message
    }
}
