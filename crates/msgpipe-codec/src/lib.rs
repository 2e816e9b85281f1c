//! Binary struct codec for msgpipe messages.
//!
//! A message is a header followed by one payload struct. Structs carry an
//! 8-byte header (`num_bytes`, `num_fields`) and their fixed-size fields in
//! declaration order; strings, arrays and nested structs are stored
//! out-of-line behind relative `u64` pointers. Handles travel in a side array
//! and are referenced by index.
//!
//! ```
//! use msgpipe_codec::{decode_message, encode_message, FieldReader, FieldWriter, MessageHeader, Result, Struct};
//!
//! #[derive(Debug, PartialEq)]
//! struct Greeting {
//!     id: u32,
//!     text: String,
//! }
//!
//! impl Struct for Greeting {
//!     const NAME: &'static str = "Greeting";
//!
//!     fn encode_fields<'v>(&'v self, fields: &mut FieldWriter<'_, 'v>) {
//!         fields.write_u32(self.id);
//!         fields.write_string(&self.text);
//!     }
//!
//!     fn decode_fields(fields: &mut FieldReader<'_, '_>) -> Result<Self> {
//!         Ok(Self {
//!             id: fields.read_u32()?,
//!             text: fields.read_string()?,
//!         })
//!     }
//! }
//!
//! let message = encode_message(&MessageHeader::new(1), Greeting { id: 3, text: "hello".into() });
//! let (header, greeting) = decode_message::<Greeting>(message).unwrap();
//! assert_eq!(header.ordinal, 1);
//! assert_eq!(greeting, Greeting { id: 3, text: "hello".into() });
//! ```

pub mod codec;
pub mod element;
pub mod error;
pub mod header;
pub mod message;
pub mod reader;
pub mod writer;

pub use codec::{
    align, decode, decode_message, encode, encode_message, Struct, ARRAY_HEADER_SIZE,
    ENCODED_INVALID_HANDLE, MAP_DATA_SIZE, POINTER_SIZE, STRUCT_HEADER_SIZE,
};
pub use element::ArrayElement;
pub use error::{CodecError, Result};
pub use header::{
    MessageHeader, FLAG_EXPECTS_RESPONSE, FLAG_IS_RESPONSE, MESSAGE_V0_HEADER_SIZE,
    MESSAGE_V1_HEADER_SIZE,
};
pub use message::Message;
pub use reader::{Decoder, FieldReader};
pub use writer::{Encoder, FieldWriter};
