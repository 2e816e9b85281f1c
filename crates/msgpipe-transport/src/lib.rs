//! Message pipe handles and the native primitives they are driven by.
//!
//! This is the lowest layer of msgpipe. It defines:
//! - [`Handle`], an owned, move-only endpoint reference
//! - [`MessagePipeCore`], the write/read/async-wait/close primitives the
//!   connector is built on
//! - [`LocalCore`], an in-process implementation with a single-threaded
//!   reactor, used by tests, demos, and same-process channels

pub mod error;
pub mod handle;
pub mod local;
pub mod traits;

pub use error::{Result, TransportError};
pub use handle::Handle;
pub use local::{LocalCore, LocalCoreConfig, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_QUEUED_MESSAGES};
pub use traits::{
    MessagePipeCore, RawMessage, ReadFlags, Signal, WaitCallback, WaitToken, WriteFlags,
};
