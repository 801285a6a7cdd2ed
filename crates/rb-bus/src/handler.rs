use async_trait::async_trait;

use crate::send_bus::SendBus;
use rb_common::{BusMessage, ProcessingError};

/// Handles one decoded message.
///
/// A fresh instance is constructed per dispatch from its registered
/// factory; nothing mutable is shared between dispatches.
#[async_trait]
pub trait MessageHandler<M: BusMessage>: Send + Sync {
    async fn handle(&self, message: &M) -> anyhow::Result<()>;
}

/// Invoked when a message has exhausted its retries or failed to parse.
///
/// `M` is either a payload type or [`rb_common::TransportMessage`] for
/// handlers that run on every dead-lettered delivery.
#[async_trait]
pub trait FaultHandler<M: Send + Sync + 'static>: Send + Sync {
    async fn handle(&self, message: &M, error: &ProcessingError) -> anyhow::Result<()>;
}

/// Per-dispatch values injected into freshly constructed handlers.
#[derive(Clone)]
pub struct HandlerContext {
    /// Send bus bound to the dispatch transaction. Outbound sends made
    /// through it flush atomically with the dispatch commit.
    pub bus: SendBus,
    /// Type name of the handler under construction; also keys the
    /// per-handler log span.
    pub handler_name: &'static str,
}
