use bytes::Bytes;

use crate::error::Result;
use crate::handle::Handle;

/// Flags accepted by [`MessagePipeCore::write_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteFlags(u32);

impl WriteFlags {
    /// No special handling.
    pub const NONE: WriteFlags = WriteFlags(0);

    pub const fn bits(self) -> u32 {
        self.0
    }
}

/// Flags accepted by [`MessagePipeCore::read_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadFlags(u32);

impl ReadFlags {
    /// No special handling.
    pub const NONE: ReadFlags = ReadFlags(0);

    pub const fn bits(self) -> u32 {
        self.0
    }
}

/// Handle state an async wait can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// A message is queued, or the peer closed (so a read will report it).
    Readable,
}

/// Identifies an outstanding async-wait registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaitToken(u64);

impl WaitToken {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// One-shot readiness notification. Invoked by the reactor, never re-entrantly
/// from inside a primitive call.
pub type WaitCallback = Box<dyn FnOnce(Result<()>)>;

/// A message as it comes off the pipe: bytes plus attached handles.
#[derive(Debug, Default)]
pub struct RawMessage {
    pub bytes: Bytes,
    pub handles: Vec<Handle>,
}

impl RawMessage {
    pub fn new(bytes: impl Into<Bytes>, handles: Vec<Handle>) -> Self {
        Self {
            bytes: bytes.into(),
            handles,
        }
    }
}

/// The native message pipe primitives everything above this crate is built on.
///
/// Implementations are single-threaded: callers serialize every call, and
/// wait callbacks run from the embedding event loop.
pub trait MessagePipeCore {
    /// Write one message.
    ///
    /// On success every handle in `handles` has been moved into the transport
    /// and the vector is left empty. On failure the vector is untouched.
    fn write_message(
        &self,
        handle: &Handle,
        bytes: &[u8],
        handles: &mut Vec<Handle>,
        flags: WriteFlags,
    ) -> Result<()>;

    /// Read the next queued message.
    ///
    /// `Ok(None)` means nothing is available yet; callers should wait for
    /// [`Signal::Readable`] and try again.
    fn read_message(&self, handle: &Handle, flags: ReadFlags) -> Result<Option<RawMessage>>;

    /// Register a one-shot wait for `signal` on `handle`.
    fn async_wait(&self, handle: &Handle, signal: Signal, callback: WaitCallback)
        -> Result<WaitToken>;

    /// Cancel an outstanding wait. Unknown or already-fired tokens are ignored.
    fn cancel_wait(&self, token: WaitToken);

    /// Close an endpoint, consuming the handle.
    fn close(&self, handle: Handle) -> Result<()>;
}
