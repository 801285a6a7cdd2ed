use async_trait::async_trait;
use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::codec::{decode_message, Codec, CodecError};
use crate::handler::{FaultHandler, HandlerContext, MessageHandler};
use rb_common::{AnyPayload, BusMessage, ProcessingError};

type DecodeFn = Arc<dyn Fn(&dyn Codec, &str) -> Result<AnyPayload, CodecError> + Send + Sync>;

/// One resolvable message type: its wire name, runtime identity, and the
/// decoder fixed at registration time.
#[derive(Clone)]
pub struct RegisteredType {
    pub type_name: &'static str,
    pub type_id: TypeId,
    decoder: DecodeFn,
}

impl RegisteredType {
    pub fn of<M: BusMessage>() -> Self {
        Self {
            type_name: M::TYPE_NAME,
            type_id: TypeId::of::<M>(),
            decoder: Arc::new(|codec, raw| {
                let message = decode_message::<M>(codec, raw)?;
                Ok(Arc::new(message) as AnyPayload)
            }),
        }
    }

    pub fn decode(&self, codec: &dyn Codec, raw: &str) -> Result<AnyPayload, CodecError> {
        (self.decoder)(codec, raw)
    }
}

/// Maps fully-qualified type names to concrete runtime types.
///
/// Populated at bus construction and immutable afterwards; message types
/// travel as names across the wire and are resolved here on receive.
#[derive(Default, Clone)]
pub struct TypeRegistry {
    by_name: HashMap<&'static str, RegisteredType>,
}

impl TypeRegistry {
    pub fn register<M: BusMessage>(&mut self) {
        self.by_name.insert(M::TYPE_NAME, RegisteredType::of::<M>());
    }

    pub fn resolve(&self, type_name: &str) -> Option<&RegisteredType> {
        self.by_name.get(type_name)
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Type-erased invoker for one registered (message type, handler type)
/// pair. Downcasts the payload and constructs a fresh handler per call.
#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    fn handler_name(&self) -> &'static str;
    async fn invoke(&self, payload: &AnyPayload, ctx: &HandlerContext) -> anyhow::Result<()>;
}

pub(crate) struct HandlerAdapter<M, H> {
    build: Arc<dyn Fn(&HandlerContext) -> H + Send + Sync>,
    _payload: PhantomData<fn() -> M>,
}

impl<M, H> HandlerAdapter<M, H> {
    pub(crate) fn new(build: impl Fn(&HandlerContext) -> H + Send + Sync + 'static) -> Self {
        Self {
            build: Arc::new(build),
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<M, H> ErasedHandler for HandlerAdapter<M, H>
where
    M: BusMessage,
    H: MessageHandler<M> + 'static,
{
    fn handler_name(&self) -> &'static str {
        std::any::type_name::<H>()
    }

    async fn invoke(&self, payload: &AnyPayload, ctx: &HandlerContext) -> anyhow::Result<()> {
        let message = payload
            .downcast_ref::<M>()
            .ok_or_else(|| anyhow::anyhow!("payload is not a {}", M::TYPE_NAME))?;
        let handler = (self.build)(ctx);
        handler.handle(message).await
    }
}

/// Type-erased fault-handler invoker.
#[async_trait]
pub(crate) trait ErasedFaultHandler: Send + Sync {
    fn handler_name(&self) -> &'static str;
    async fn invoke(
        &self,
        payload: &AnyPayload,
        error: &ProcessingError,
        ctx: &HandlerContext,
    ) -> anyhow::Result<()>;
}

pub(crate) struct FaultAdapter<M, H> {
    build: Arc<dyn Fn(&HandlerContext) -> H + Send + Sync>,
    _payload: PhantomData<fn() -> M>,
}

impl<M, H> FaultAdapter<M, H> {
    pub(crate) fn new(build: impl Fn(&HandlerContext) -> H + Send + Sync + 'static) -> Self {
        Self {
            build: Arc::new(build),
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<M, H> ErasedFaultHandler for FaultAdapter<M, H>
where
    M: Send + Sync + 'static,
    H: FaultHandler<M> + 'static,
{
    fn handler_name(&self) -> &'static str {
        std::any::type_name::<H>()
    }

    async fn invoke(
        &self,
        payload: &AnyPayload,
        error: &ProcessingError,
        ctx: &HandlerContext,
    ) -> anyhow::Result<()> {
        let message = payload
            .downcast_ref::<M>()
            .ok_or_else(|| anyhow::anyhow!("payload is not a {}", std::any::type_name::<M>()))?;
        let handler = (self.build)(ctx);
        handler.handle(message, error).await
    }
}

/// Handler sets per message type, plus the fault-handler sets.
///
/// Populated at bus construction and thereafter immutable. Vec order gives
/// each type's handlers a stable invocation order for the process run.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TypeId, Vec<Arc<dyn ErasedHandler>>>,
    fault_handlers: HashMap<TypeId, Vec<Arc<dyn ErasedFaultHandler>>>,
}

impl HandlerRegistry {
    /// Register a handler for messages of type `M`, constructed per
    /// dispatch by `factory`.
    pub fn register_handler<M, H, F>(&mut self, factory: F)
    where
        M: BusMessage,
        H: MessageHandler<M> + 'static,
        F: Fn(&HandlerContext) -> H + Send + Sync + 'static,
    {
        self.handlers
            .entry(TypeId::of::<M>())
            .or_default()
            .push(Arc::new(HandlerAdapter::<M, H>::new(factory)));
    }

    /// Register a fault handler keyed on `M`: a payload type, or
    /// `TransportMessage` to run on every dead-lettered delivery.
    pub fn register_fault_handler<M, H, F>(&mut self, factory: F)
    where
        M: Send + Sync + 'static,
        H: FaultHandler<M> + 'static,
        F: Fn(&HandlerContext) -> H + Send + Sync + 'static,
    {
        self.fault_handlers
            .entry(TypeId::of::<M>())
            .or_default()
            .push(Arc::new(FaultAdapter::<M, H>::new(factory)));
    }

    pub(crate) fn handlers_for(&self, type_id: TypeId) -> &[Arc<dyn ErasedHandler>] {
        self.handlers
            .get(&type_id)
            .map(|handlers| handlers.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn fault_handlers_for(&self, type_id: TypeId) -> &[Arc<dyn ErasedFaultHandler>] {
        self.fault_handlers
            .get(&type_id)
            .map(|handlers| handlers.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_handlers(&self) -> bool {
        !self.handlers.is_empty()
    }
}
