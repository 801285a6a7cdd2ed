//! RelayBus core: the receive-and-dispatch pipeline and the transactional
//! send pipeline, built over the queue/topic abstractions in
//! `rb-transport`.
//!
//! A receiving bus owns one input queue subscribed to the topics of its
//! handled message types. N message pumps poll the queue concurrently,
//! parse deliveries through the type registry, and dispatch them to
//! handlers constructed fresh per dispatch. Outbound sends made during a
//! dispatch enlist on the dispatch's transaction context and flush only
//! when it commits.

pub mod bus;
pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod logger;
pub mod mock;
pub mod parser;
pub mod pump;
pub mod registry;
pub mod send_bus;
pub mod transaction;

pub use bus::{Bus, BusBuilder, SendBusFactory};
pub use codec::{Codec, CodecError, JsonCodec};
pub use dispatcher::Dispatcher;
pub use error::{BusConfigError, PublishError};
pub use handler::{FaultHandler, HandlerContext, MessageHandler};
pub use logger::{MessageLogger, TracingMessageLogger};
pub use parser::MessageParser;
pub use pump::{MessagePump, PumpState};
pub use registry::{HandlerRegistry, TypeRegistry};
pub use send_bus::SendBus;
pub use transaction::TransactionContext;

pub use rb_common::{
    topic_name, BusConfig, BusMessage, MessageProcessingResult, ProcessingError, TransportMessage,
};
pub use rb_transport::{QueueClient, RawQueueMessage, TopicPublisher, TransportError};
