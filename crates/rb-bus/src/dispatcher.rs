use std::any::TypeId;
use std::sync::Arc;
use tracing::{error, info_span, warn, Instrument};

use crate::handler::HandlerContext;
use crate::registry::HandlerRegistry;
use crate::send_bus::SendBus;
use crate::transaction::TransactionContext;
use rb_common::{AnyPayload, MessageProcessingResult, ProcessingError, TransportMessage};

/// Runs one message through its handler set under a transaction scope.
pub struct Dispatcher {
    handlers: Arc<HandlerRegistry>,
}

impl Dispatcher {
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self { handlers }
    }

    /// Dispatch a parsed message.
    ///
    /// Every handler in the set runs even when an earlier one fails; retry
    /// is whole-message grained, so partial progress cannot be
    /// acknowledged per handler. The transaction commits regardless of
    /// handler errors, flushing sends enlisted by the handlers that
    /// succeeded; acknowledgement is decided by the pump from the returned
    /// result.
    pub async fn dispatch(
        &self,
        message: &TransportMessage,
        bus: &SendBus,
    ) -> MessageProcessingResult {
        let (Some(type_id), Some(payload)) = (message.message_type, message.message.clone()) else {
            return MessageProcessingResult::failed(ProcessingError::NoHandler(
                message.message_type_name.clone(),
            ));
        };

        let handlers = self.handlers.handlers_for(type_id);
        if handlers.is_empty() {
            warn!(message_type = %message.message_type_name, "No handler registered");
            return MessageProcessingResult::failed(ProcessingError::NoHandler(
                message.message_type_name.clone(),
            ));
        }

        let transaction = TransactionContext::new();
        let transactional_bus = bus.with_transaction(transaction.clone());

        let mut error: Option<ProcessingError> = None;

        for handler in handlers {
            let ctx = HandlerContext {
                bus: transactional_bus.clone(),
                handler_name: handler.handler_name(),
            };
            let span = info_span!(
                "handle",
                handler = ctx.handler_name,
                message_type = %message.message_type_name,
            );

            if let Err(e) = handler.invoke(&payload, &ctx).instrument(span).await {
                error!(
                    handler = ctx.handler_name,
                    message_type = %message.message_type_name,
                    error = %e,
                    "Handler failed"
                );
                error = Some(ProcessingError::Handler {
                    handler: ctx.handler_name.to_string(),
                    message: e.to_string(),
                });
            }
        }

        if let Err(e) = bus.commit(transaction).await {
            error!(error = %e, "Failed to flush outbound sends on commit");
            if error.is_none() {
                error = Some(ProcessingError::Flush(e.to_string()));
            }
        }

        match error {
            None => MessageProcessingResult::ok(),
            Some(error) => MessageProcessingResult::failed(error),
        }
    }

    /// Invoke fault handlers for a dead-lettered message: first those
    /// registered for the transport message itself, then those for the
    /// decoded payload type. Fault handler failures are logged and
    /// swallowed.
    pub async fn dispatch_fault(
        &self,
        message: &TransportMessage,
        bus: &SendBus,
        error: &ProcessingError,
    ) {
        let transport_payload: AnyPayload = Arc::new(message.clone());
        self.invoke_fault_handlers(
            TypeId::of::<TransportMessage>(),
            &transport_payload,
            bus,
            error,
        )
        .await;

        if message.parsing_succeeded {
            if let (Some(type_id), Some(payload)) = (message.message_type, message.message.clone())
            {
                self.invoke_fault_handlers(type_id, &payload, bus, error).await;
            }
        }
    }

    async fn invoke_fault_handlers(
        &self,
        type_id: TypeId,
        payload: &AnyPayload,
        bus: &SendBus,
        error: &ProcessingError,
    ) {
        for handler in self.handlers.fault_handlers_for(type_id) {
            let ctx = HandlerContext {
                bus: bus.clone(),
                handler_name: handler.handler_name(),
            };
            if let Err(e) = handler.invoke(payload, error, &ctx).await {
                error!(handler = ctx.handler_name, error = %e, "Fault handler failed");
            }
        }
    }
}
