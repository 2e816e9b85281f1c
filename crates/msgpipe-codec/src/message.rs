use bytes::Bytes;
use msgpipe_transport::{Handle, RawMessage};

use crate::error::Result;
use crate::header::MessageHeader;

/// An encoded message: a byte buffer plus the handles it references.
///
/// Handle slots inside the buffer are indices into `handles`; the codec
/// assigns them in strictly increasing order. A `Message` owns its handles,
/// so sending one moves them to the transport.
#[derive(Debug, Default)]
pub struct Message {
    bytes: Bytes,
    handles: Vec<Handle>,
}

impl Message {
    pub fn new(bytes: impl Into<Bytes>, handles: Vec<Handle>) -> Self {
        Self {
            bytes: bytes.into(),
            handles,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn handles(&self) -> &[Handle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Parse the message header at the front of the buffer.
    pub fn header(&self) -> Result<MessageHeader> {
        MessageHeader::parse(&self.bytes)
    }

    pub fn into_parts(self) -> (Bytes, Vec<Handle>) {
        (self.bytes, self.handles)
    }
}

impl From<RawMessage> for Message {
    fn from(raw: RawMessage) -> Self {
        Self::new(raw.bytes, raw.handles)
    }
}

impl From<Message> for RawMessage {
    fn from(message: Message) -> Self {
        RawMessage::new(message.bytes, message.handles)
    }
}
