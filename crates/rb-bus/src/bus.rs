use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::codec::{Codec, JsonCodec};
use crate::dispatcher::Dispatcher;
use crate::error::BusConfigError;
use crate::handler::{FaultHandler, HandlerContext, MessageHandler};
use crate::logger::MessageLogger;
use crate::parser::MessageParser;
use crate::pump::MessagePump;
use crate::registry::{HandlerRegistry, TypeRegistry};
use crate::send_bus::SendBus;
use rb_common::{BusConfig, BusMessage, TransportMessage};
use rb_transport::{QueueClient, TopicPublisher};

/// Fluent assembly of a bus instance.
pub struct BusBuilder {
    config: BusConfig,
    codec: Arc<dyn Codec>,
    types: TypeRegistry,
    handlers: HandlerRegistry,
    queue: Option<Arc<dyn QueueClient>>,
    publisher: Option<Arc<dyn TopicPublisher>>,
    message_logger: Option<Arc<dyn MessageLogger>>,
    handled_types: Vec<&'static str>,
    publish_types: Vec<&'static str>,
}

impl BusBuilder {
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        Self {
            config,
            codec: Arc::new(JsonCodec),
            types: TypeRegistry::default(),
            handlers: HandlerRegistry::default(),
            queue: None,
            publisher: None,
            message_logger: None,
            handled_types: Vec::new(),
            publish_types: Vec::new(),
        }
    }

    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn input_queue(mut self, queue: Arc<dyn QueueClient>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn topic_publisher(mut self, publisher: Arc<dyn TopicPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn message_logger(mut self, logger: Arc<dyn MessageLogger>) -> Self {
        self.message_logger = Some(logger);
        self
    }

    /// Route messages of type `M` to a handler constructed per dispatch by
    /// `factory`. Registers `M` for resolution and subscribes the input
    /// queue to its topic on build.
    pub fn handle<M, H, F>(mut self, factory: F) -> Self
    where
        M: BusMessage,
        H: MessageHandler<M> + 'static,
        F: Fn(&HandlerContext) -> H + Send + Sync + 'static,
    {
        self.types.register::<M>();
        if !self.handled_types.contains(&M::TYPE_NAME) {
            self.handled_types.push(M::TYPE_NAME);
        }
        self.handlers.register_handler::<M, H, F>(factory);
        self
    }

    /// Route dead-lettered messages of type `M` to a fault handler.
    pub fn fault_handler<M, H, F>(mut self, factory: F) -> Self
    where
        M: BusMessage,
        H: FaultHandler<M> + 'static,
        F: Fn(&HandlerContext) -> H + Send + Sync + 'static,
    {
        self.types.register::<M>();
        self.handlers.register_fault_handler::<M, H, F>(factory);
        self
    }

    /// Fault handler for the raw transport message; runs for every
    /// dead-lettered delivery, including parse failures.
    pub fn transport_fault_handler<H, F>(mut self, factory: F) -> Self
    where
        H: FaultHandler<TransportMessage> + 'static,
        F: Fn(&HandlerContext) -> H + Send + Sync + 'static,
    {
        self.handlers
            .register_fault_handler::<TransportMessage, H, F>(factory);
        self
    }

    /// Declare a publishable type so its topic is registered up front.
    pub fn publishes<M: BusMessage>(mut self) -> Self {
        if !self.publish_types.contains(&M::TYPE_NAME) {
            self.publish_types.push(M::TYPE_NAME);
        }
        self
    }

    /// Validate and assemble a startable bus: register publish topics,
    /// subscribe the input queue to every handled type, and construct the
    /// configured number of pumps.
    pub async fn build(self) -> Result<Bus, BusConfigError> {
        if self.config.number_of_polling_instances == 0 {
            return Err(BusConfigError::Invalid(
                "number_of_polling_instances must be at least 1".to_string(),
            ));
        }
        if self.config.message_retry_count == 0 {
            return Err(BusConfigError::Invalid(
                "message_retry_count must be at least 1".to_string(),
            ));
        }
        let Some(queue) = self.queue.clone() else {
            return Err(BusConfigError::Invalid(
                "a receiving bus requires an input queue".to_string(),
            ));
        };
        if self.handled_types.is_empty() {
            return Err(BusConfigError::Invalid(
                "a receiving bus requires at least one handler".to_string(),
            ));
        }

        if let Some(publisher) = &self.publisher {
            if !self.publish_types.is_empty() {
                let names: Vec<String> =
                    self.publish_types.iter().map(|s| s.to_string()).collect();
                publisher.register_topics(&names).await?;
            }
        }

        let subscriptions: Vec<String> = self.handled_types.iter().map(|s| s.to_string()).collect();
        queue.subscribe(&subscriptions).await?;

        let send_bus = SendBus::new(
            self.codec.clone(),
            self.publisher.clone(),
            Some(queue.clone()),
        );
        let parser = MessageParser::new(Arc::new(self.types), self.codec.clone());
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(self.handlers)));

        let pumps = (0..self.config.number_of_polling_instances)
            .map(|id| {
                Arc::new(MessagePump::new(
                    id,
                    queue.clone(),
                    parser.clone(),
                    dispatcher.clone(),
                    send_bus.clone(),
                    &self.config,
                    self.message_logger.clone(),
                ))
            })
            .collect::<Vec<_>>();

        info!(
            queue = %queue.address(),
            pumps = pumps.len(),
            handled_types = subscriptions.len(),
            "Bus assembled"
        );

        Ok(Bus {
            pumps,
            workers: Mutex::new(Vec::new()),
            send_bus,
        })
    }

    /// Assemble a send-only bus factory. No queue or handlers required;
    /// with a queue configured, local sends and the `sender` attribute
    /// become available.
    pub async fn build_send_only(self) -> Result<SendBusFactory, BusConfigError> {
        if self.publisher.is_none() && self.queue.is_none() {
            return Err(BusConfigError::Invalid(
                "a send-only bus requires a topic publisher or a queue".to_string(),
            ));
        }

        if let Some(publisher) = &self.publisher {
            if !self.publish_types.is_empty() {
                let names: Vec<String> =
                    self.publish_types.iter().map(|s| s.to_string()).collect();
                publisher.register_topics(&names).await?;
            }
        }

        Ok(SendBusFactory::new(SendBus::new(
            self.codec,
            self.publisher,
            self.queue,
        )))
    }
}

impl Default for BusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured bus: start and stop receiving, create send buses.
pub struct Bus {
    pumps: Vec<Arc<MessagePump>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    send_bus: SendBus,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus").finish_non_exhaustive()
    }
}

impl Bus {
    /// Spawn one worker task per configured pump. Idempotent while
    /// receiving.
    pub fn start_receiving(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        for pump in &self.pumps {
            let pump = pump.clone();
            workers.push(tokio::spawn(async move { pump.run().await }));
        }
        info!(pumps = self.pumps.len(), "Receiving started");
    }

    /// Stop every pump, then await all workers. In-flight dispatches run
    /// to completion before their pump exits.
    pub async fn stop_receiving(&self) {
        for pump in &self.pumps {
            pump.stop();
        }

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Pump worker panicked");
            }
        }
        info!("Receiving stopped");
    }

    /// A fresh send bus sharing this bus's codec and transports.
    pub fn create_send_bus(&self) -> SendBus {
        self.send_bus.clone()
    }
}

/// Creates send-only buses sharing one codec and transport set.
#[derive(Clone)]
pub struct SendBusFactory {
    template: SendBus,
}

impl SendBusFactory {
    pub(crate) fn new(template: SendBus) -> Self {
        Self { template }
    }

    pub fn create(&self) -> SendBus {
        self.template.clone()
    }
}
