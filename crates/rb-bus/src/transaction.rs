use parking_lot::Mutex;
use std::sync::Arc;

use crate::codec::{Codec, CodecError};

/// Destination of a buffered outbound action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutboundMode {
    Publish,
    SendLocal,
}

/// A deferred outbound send. The build closure performs serialization and
/// is only invoked when the owning transaction commits.
pub(crate) struct PendingOutbound {
    pub mode: OutboundMode,
    pub type_name: &'static str,
    pub build: Box<dyn FnOnce(&dyn Codec) -> Result<String, CodecError> + Send>,
}

/// Explicit transaction scope that outbound sends enlist on.
///
/// The dispatcher opens one per dispatch; client code may open its own.
/// Committing through [`crate::SendBus::commit`] flushes entries in
/// insertion order. Discarding (or simply dropping the context) abandons
/// the buffer with the build closures never invoked, so nothing is
/// serialized.
#[derive(Default)]
pub struct TransactionContext {
    pending: Mutex<Vec<PendingOutbound>>,
}

impl TransactionContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn enlist(&self, action: PendingOutbound) {
        self.pending.lock().push(action);
    }

    /// Number of buffered actions.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drop the buffer unread.
    pub fn discard(&self) {
        self.pending.lock().clear();
    }

    pub(crate) fn take_pending(&self) -> Vec<PendingOutbound> {
        std::mem::take(&mut *self.pending.lock())
    }
}
