use thiserror::Error;

use crate::codec::CodecError;
use rb_transport::TransportError;

/// Raised synchronously to the caller of `publish` / `publish_local`.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("bus has no topic publisher configured")]
    NoPublisher,

    #[error("bus has no local queue configured")]
    NoLocalQueue,
}

/// Raised by the builder; never reaches the pump.
#[derive(Error, Debug)]
pub enum BusConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
