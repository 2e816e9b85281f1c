/// Errors raised while decoding a message. Encoding a well-typed value never fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// A read ran past the end of the enclosing object or buffer.
    #[error("truncated data: need {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// The total message size is not a multiple of the 8-byte stride.
    #[error("message size {0} is not a multiple of 8")]
    InvalidMessageSize(usize),

    /// A pointer resolves to a position outside the buffer.
    #[error("pointer target {target} is outside the {len}-byte buffer")]
    PointerOutOfBounds { target: u64, len: usize },

    /// An object's declared size extends past the end of the buffer.
    #[error("object at offset {offset} ({size} bytes) extends past the {len}-byte buffer")]
    ObjectOutOfBounds {
        offset: usize,
        size: usize,
        len: usize,
    },

    /// An object header is not on an 8-byte boundary.
    #[error("object at offset {0} is not 8-byte aligned")]
    MisalignedObject(usize),

    /// An object starts inside data that was already decoded.
    #[error("object at offset {offset} overlaps data decoded up to {claimed}")]
    OverlappingObject { offset: usize, claimed: usize },

    /// A struct header is too small to hold itself.
    #[error("invalid struct header: {num_bytes} bytes, {num_fields} fields")]
    InvalidStructHeader { num_bytes: u32, num_fields: u32 },

    /// An array header claims more elements than its size can hold.
    #[error("invalid array header: {num_bytes} bytes, {num_elements} elements")]
    InvalidArrayHeader { num_bytes: u32, num_elements: u32 },

    /// A map struct must be exactly 24 bytes with version 0.
    #[error("invalid map header: {num_bytes} bytes, version {version}")]
    InvalidMapHeader { num_bytes: u32, version: u32 },

    /// A map's keys and values arrays differ in length.
    #[error("map has {keys} keys but {values} values")]
    MapLengthMismatch { keys: usize, values: usize },

    /// The same key appears twice in a map's keys array.
    #[error("duplicate map key at index {index}")]
    DuplicateMapKey { index: usize },

    /// A non-nullable pointer field was encoded as null.
    #[error("unexpected null pointer for {0}")]
    UnexpectedNullPointer(&'static str),

    /// A handle index refers past the message's handle array.
    #[error("handle index {index} out of range ({available} handles attached)")]
    InvalidHandleIndex { index: u32, available: usize },

    /// Handle indices must be strictly increasing in decode order.
    #[error("handle index {index} decoded out of order")]
    HandleOutOfOrder { index: u32 },

    /// String payload is not valid UTF-8.
    #[error("invalid utf-8 in string payload: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// The message header is malformed.
    #[error("invalid message header: {0}")]
    InvalidMessageHeader(&'static str),

    /// The message header has a version this codec does not understand.
    #[error("unsupported message header version {0}")]
    UnsupportedHeaderVersion(u32),
}

pub type Result<T> = std::result::Result<T, CodecError>;
