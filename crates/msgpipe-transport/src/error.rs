/// Errors reported by message pipe primitives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The handle does not name an open endpoint.
    #[error("invalid handle {0}")]
    InvalidHandle(u32),

    /// An argument was rejected by the primitive (e.g. attaching the writing
    /// endpoint to its own message).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The peer endpoint has been closed and no more messages are queued.
    #[error("peer endpoint closed")]
    PeerClosed,

    /// The transport ran out of a resource (queue space, handle slots).
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    /// A wait was cancelled before it was satisfied.
    #[error("wait cancelled")]
    Cancelled,

    /// Any other failure reported by the native layer.
    #[error("transport failure: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
