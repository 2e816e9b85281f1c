use msgpipe_codec::CodecError;
use msgpipe_transport::TransportError;

/// Errors raised by connectors, proxies and local stubs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingsError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The message could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The connection (or the proxy it handed out) has been closed.
    #[error("connection closed")]
    Closed,

    /// The pipe failed or the peer went away while a call was in flight.
    #[error("connection lost")]
    Disconnected,

    /// The connector refused the message; its pipe is in the error state.
    #[error("message could not be sent")]
    SendFailed,

    /// No local method is registered for this ordinal.
    #[error("no method registered for ordinal {0}")]
    UnknownOrdinal(u32),

    /// A response arrived for a request id that is not pending.
    #[error("response for unknown request id {0}")]
    UnexpectedResponse(u64),

    /// The message is well-formed but violates the interface contract.
    #[error("malformed message: {0}")]
    Malformed(&'static str),
}

pub type Result<T> = std::result::Result<T, BindingsError>;
