//! Message header layout and flags.
//!
//! Every message starts with a header laid out like a struct header:
//!
//! ```text
//! offset  0  num_bytes     u32   24 (v0) or 32 (v1)
//! offset  4  version       u32   0 or 1
//! offset  8  interface_id  u32
//! offset 12  ordinal       u32
//! offset 16  flags         u32
//! offset 20  padding       u32
//! offset 24  request_id    u64   v1 only
//! ```

use crate::error::{CodecError, Result};
use crate::writer::Encoder;

/// Size of a v0 header (no request id).
pub const MESSAGE_V0_HEADER_SIZE: usize = 24;

/// Size of a v1 header (carries a request id).
pub const MESSAGE_V1_HEADER_SIZE: usize = 32;

/// The sender expects a reply carrying the same request id.
pub const FLAG_EXPECTS_RESPONSE: u32 = 1 << 0;

/// This message is a reply to an earlier request.
pub const FLAG_IS_RESPONSE: u32 = 1 << 1;

const RESPONSE_FLAGS: u32 = FLAG_EXPECTS_RESPONSE | FLAG_IS_RESPONSE;

/// Routing information carried in front of every payload struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    pub interface_id: u32,
    pub ordinal: u32,
    pub flags: u32,
    pub request_id: u64,
}

impl MessageHeader {
    /// Header for a one-way message.
    pub fn new(ordinal: u32) -> Self {
        Self {
            ordinal,
            ..Self::default()
        }
    }

    /// Header for a request that expects a reply.
    pub fn request(ordinal: u32, request_id: u64) -> Self {
        Self {
            ordinal,
            flags: FLAG_EXPECTS_RESPONSE,
            request_id,
            ..Self::default()
        }
    }

    /// Header for the reply to `request_id`.
    pub fn response(ordinal: u32, request_id: u64) -> Self {
        Self {
            ordinal,
            flags: FLAG_IS_RESPONSE,
            request_id,
            ..Self::default()
        }
    }

    pub fn expects_response(&self) -> bool {
        self.flags & FLAG_EXPECTS_RESPONSE != 0
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAG_IS_RESPONSE != 0
    }

    /// Header version this value encodes as.
    pub fn version(&self) -> u32 {
        if self.flags & RESPONSE_FLAGS != 0 {
            1
        } else {
            0
        }
    }

    /// Encoded header size in bytes; the payload struct starts here.
    pub fn encoded_size(&self) -> usize {
        if self.version() == 0 {
            MESSAGE_V0_HEADER_SIZE
        } else {
            MESSAGE_V1_HEADER_SIZE
        }
    }

    /// Parse the header at the front of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let num_bytes = read_u32(data, 0)?;
        let version = read_u32(data, 4)?;
        match (version, num_bytes as usize) {
            (0, MESSAGE_V0_HEADER_SIZE) | (1, MESSAGE_V1_HEADER_SIZE) => {}
            (0 | 1, _) => {
                return Err(CodecError::InvalidMessageHeader(
                    "header size does not match its version",
                ))
            }
            (other, _) => return Err(CodecError::UnsupportedHeaderVersion(other)),
        }
        if data.len() < num_bytes as usize {
            return Err(CodecError::Truncated {
                offset: 0,
                needed: num_bytes as usize,
                available: data.len(),
            });
        }

        let flags = read_u32(data, 16)?;
        if version == 0 && flags & RESPONSE_FLAGS != 0 {
            return Err(CodecError::InvalidMessageHeader(
                "request/response flags require a v1 header",
            ));
        }

        let request_id = if version == 1 {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&data[24..32]);
            u64::from_le_bytes(raw)
        } else {
            0
        };

        Ok(Self {
            interface_id: read_u32(data, 8)?,
            ordinal: read_u32(data, 12)?,
            flags,
            request_id,
        })
    }

    pub(crate) fn encode(&self, encoder: &mut Encoder) {
        let size = self.encoded_size();
        let base = encoder.reserve(size);
        encoder.put_at(base, (size as u32).to_le_bytes());
        encoder.put_at(base + 4, self.version().to_le_bytes());
        encoder.put_at(base + 8, self.interface_id.to_le_bytes());
        encoder.put_at(base + 12, self.ordinal.to_le_bytes());
        encoder.put_at(base + 16, self.flags.to_le_bytes());
        if size == MESSAGE_V1_HEADER_SIZE {
            encoder.put_at(base + 24, self.request_id.to_le_bytes());
        }
    }
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    let bytes = data.get(offset..offset + 4).ok_or(CodecError::Truncated {
        offset,
        needed: 4,
        available: data.len().saturating_sub(offset),
    })?;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    Ok(u32::from_le_bytes(raw))
}
