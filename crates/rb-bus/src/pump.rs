use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::dispatcher::Dispatcher;
use crate::logger::MessageLogger;
use crate::parser::MessageParser;
use crate::send_bus::SendBus;
use rb_common::{BusConfig, ProcessingError, TransportMessage};
use rb_transport::{QueueClient, RawQueueMessage};

/// Lifecycle of one polling worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// One polling worker: fetch a batch, dispatch each message, delete on
/// success or leave for retry, dead-letter after the retry budget.
///
/// The pump deletes dead-lettered messages itself, so the queue's own
/// redrive policy is not required; fault handlers are the last chance for
/// custom behavior.
pub struct MessagePump {
    id: usize,
    queue: Arc<dyn QueueClient>,
    parser: MessageParser,
    dispatcher: Arc<Dispatcher>,
    send_bus: SendBus,
    max_retries: u32,
    empty_receive_backoff: Duration,
    receive_error_backoff: Duration,
    message_logger: Option<Arc<dyn MessageLogger>>,
    state: Mutex<PumpState>,
    shutdown_tx: broadcast::Sender<()>,
}

impl MessagePump {
    pub fn new(
        id: usize,
        queue: Arc<dyn QueueClient>,
        parser: MessageParser,
        dispatcher: Arc<Dispatcher>,
        send_bus: SendBus,
        config: &BusConfig,
        message_logger: Option<Arc<dyn MessageLogger>>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            id,
            queue,
            parser,
            dispatcher,
            send_bus,
            max_retries: config.message_retry_count,
            empty_receive_backoff: Duration::from_millis(config.empty_receive_backoff_ms),
            receive_error_backoff: Duration::from_millis(config.receive_error_backoff_ms),
            message_logger,
            state: Mutex::new(PumpState::Created),
            shutdown_tx,
        }
    }

    pub fn state(&self) -> PumpState {
        *self.state.lock()
    }

    /// Poll until stopped.
    ///
    /// Cancellation only races the receive call; messages of a fetched
    /// batch always run to completion, and their acknowledgement is
    /// honored. Receive errors are logged and followed by a backoff so
    /// the pump never crashes the process.
    pub async fn run(&self) {
        {
            let mut state = self.state.lock();
            if *state != PumpState::Created {
                *state = PumpState::Stopped;
                return;
            }
            *state = PumpState::Running;
        }

        info!(pump = self.id, queue = %self.queue.address(), "Message pump started");
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if *self.state.lock() != PumpState::Running {
                break;
            }

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                result = self.queue.receive() => match result {
                    Ok(batch) => {
                        if self.process_batch(batch).await == 0 {
                            tokio::time::sleep(self.empty_receive_backoff).await;
                        }
                    }
                    Err(e) => {
                        error!(pump = self.id, error = %e, "Receive failed, backing off");
                        tokio::time::sleep(self.receive_error_backoff).await;
                    }
                },
            }
        }

        *self.state.lock() = PumpState::Stopped;
        info!(pump = self.id, "Message pump stopped");
    }

    /// Fetch and process one batch. Returns the batch size.
    pub async fn poll_once(&self) -> rb_transport::Result<usize> {
        let batch = self.queue.receive().await?;
        Ok(self.process_batch(batch).await)
    }

    async fn process_batch(&self, batch: Vec<RawQueueMessage>) -> usize {
        let count = batch.len();
        for raw in batch {
            let message = self.parser.parse(raw);
            self.process(message).await;
        }
        count
    }

    async fn process(&self, message: TransportMessage) {
        if let Some(logger) = &self.message_logger {
            logger.received(&message);
        }

        if !message.parsing_succeeded {
            // Parse failures are terminal; no amount of redelivery fixes
            // a bad envelope or an unknown type.
            let error = message
                .parse_error
                .clone()
                .unwrap_or_else(|| ProcessingError::Parse("unknown parse failure".to_string()));
            error!(
                message_type = %message.message_type_name,
                error = %error,
                "Message failed to parse"
            );
            self.dispatcher
                .dispatch_fault(&message, &self.send_bus, &error)
                .await;
            self.delete(&message).await;
            if let Some(logger) = &self.message_logger {
                logger.dead_lettered(&message);
            }
            return;
        }

        let result = self.dispatcher.dispatch(&message, &self.send_bus).await;

        if result.success {
            self.delete(&message).await;
            if let Some(logger) = &self.message_logger {
                logger.completed(&message);
            }
            return;
        }

        let error = result.error.unwrap_or_else(|| ProcessingError::Handler {
            handler: String::new(),
            message: "unknown dispatch failure".to_string(),
        });

        if message.retry_count < self.max_retries {
            // Leave undeleted; the visibility timeout returns it.
            debug!(
                message_type = %message.message_type_name,
                retry_count = message.retry_count,
                max_retries = self.max_retries,
                "Dispatch failed, leaving message for retry"
            );
            if let Some(logger) = &self.message_logger {
                logger.retried(&message);
            }
        } else {
            error!(
                message_type = %message.message_type_name,
                retry_count = message.retry_count,
                error = %error,
                "Retries exhausted, dead-lettering"
            );
            self.dispatcher
                .dispatch_fault(&message, &self.send_bus, &error)
                .await;
            self.delete(&message).await;
            if let Some(logger) = &self.message_logger {
                logger.dead_lettered(&message);
            }
        }
    }

    async fn delete(&self, message: &TransportMessage) {
        if let Err(e) = self.queue.delete(&message.receipt_handle).await {
            error!(pump = self.id, error = %e, "Failed to delete message, it will be redelivered");
        }
    }

    /// Signal the pump to stop and return promptly. The caller awaits the
    /// worker's completion separately.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                PumpState::Created | PumpState::Running => *state = PumpState::Stopping,
                PumpState::Stopping | PumpState::Stopped => {}
            }
        }
        let _ = self.shutdown_tx.send(());
    }
}
