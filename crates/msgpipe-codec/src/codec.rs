use crate::error::{CodecError, Result};
use crate::header::MessageHeader;
use crate::message::Message;
use crate::reader::{Decoder, FieldReader};
use crate::writer::{Encoder, FieldWriter};

/// Struct header: num_bytes (4) + num_fields (4).
pub const STRUCT_HEADER_SIZE: usize = 8;

/// Array header: num_bytes (4) + num_elements (4).
pub const ARRAY_HEADER_SIZE: usize = 8;

/// Pointer slots hold a `u64` offset relative to the slot itself.
pub const POINTER_SIZE: usize = 8;

/// Map struct: header, keys array pointer, values array pointer.
pub const MAP_DATA_SIZE: usize = 24;

/// Encoded value of a null handle slot.
pub const ENCODED_INVALID_HANDLE: u32 = u32::MAX;

/// Round `size` up to a multiple of `alignment` (a power of two).
pub const fn align(size: usize, alignment: usize) -> usize {
    (size + alignment - 1) & !(alignment - 1)
}

/// A message struct with a fixed field order.
///
/// Implementations play the role of generated bindings: `encode_fields`
/// writes every field in declaration order and `decode_fields` reads them
/// back in the same order. Appending fields keeps older and newer peers
/// compatible; reordering or removing them does not.
pub trait Struct: Sized {
    /// Type name used in decode errors.
    const NAME: &'static str;

    fn encode_fields<'v>(&'v self, fields: &mut FieldWriter<'_, 'v>);

    fn decode_fields(fields: &mut FieldReader<'_, '_>) -> Result<Self>;
}

/// Encode `value` as a bare struct, with no message header.
///
/// Takes the value by move: any handles it holds end up in the message.
pub fn encode<S: Struct>(value: S) -> Message {
    let mut encoder = Encoder::new();
    encoder.encode_struct(&value);
    encoder.finish()
}

/// Decode a bare struct produced by [`encode`].
pub fn decode<S: Struct>(message: Message) -> Result<S> {
    let (bytes, mut handles) = message.into_parts();
    check_size(bytes.len())?;
    Decoder::new(&bytes, &mut handles).decode_struct_at(0)
}

/// Encode a message header followed by `value` as its payload.
pub fn encode_message<S: Struct>(header: &MessageHeader, value: S) -> Message {
    let mut encoder = Encoder::new();
    header.encode(&mut encoder);
    encoder.encode_struct(&value);
    encoder.finish()
}

/// Decode the header and payload of a message produced by [`encode_message`].
pub fn decode_message<S: Struct>(message: Message) -> Result<(MessageHeader, S)> {
    let (bytes, mut handles) = message.into_parts();
    check_size(bytes.len())?;
    let header = MessageHeader::parse(&bytes)?;
    let payload = header.encoded_size();

    let mut decoder = Decoder::new(&bytes, &mut handles);
    decoder.claim(0, payload)?;
    let value = decoder.decode_struct_at(payload)?;
    tracing::trace!(
        ordinal = header.ordinal,
        request_id = header.request_id,
        payload = S::NAME,
        "decoded message"
    );
    Ok((header, value))
}

fn check_size(len: usize) -> Result<()> {
    if len % 8 != 0 {
        return Err(CodecError::InvalidMessageSize(len));
    }
    Ok(())
}

impl Message {
    /// Decode this message's header and payload.
    pub fn decode<S: Struct>(self) -> Result<(MessageHeader, S)> {
        decode_message(self)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use msgpipe_transport::Handle;
    use proptest::prelude::*;

    #[derive(Debug, Default, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
        name: String,
        array: Vec<u8>,
        handle: Handle,
    }

    impl Struct for Point {
        const NAME: &'static str = "Point";

        fn encode_fields<'v>(&'v self, fields: &mut FieldWriter<'_, 'v>) {
            fields.write_i32(self.x);
            fields.write_i32(self.y);
            fields.write_string(&self.name);
            fields.write_array(&self.array);
            fields.write_handle(&self.handle);
        }

        fn decode_fields(fields: &mut FieldReader<'_, '_>) -> Result<Self> {
            Ok(Self {
                x: fields.read_i32()?,
                y: fields.read_i32()?,
                name: fields.read_string()?,
                array: fields.read_array()?,
                handle: fields.read_handle()?,
            })
        }
    }

    #[derive(Debug, Default, PartialEq)]
    struct RecordV1 {
        id: u32,
    }

    impl Struct for RecordV1 {
        const NAME: &'static str = "Record";

        fn encode_fields<'v>(&'v self, fields: &mut FieldWriter<'_, 'v>) {
            fields.write_u32(self.id);
        }

        fn decode_fields(fields: &mut FieldReader<'_, '_>) -> Result<Self> {
            Ok(Self {
                id: fields.read_u32()?,
            })
        }
    }

    #[derive(Debug, Default, PartialEq)]
    struct RecordV2 {
        id: u32,
        active: bool,
        label: String,
        tags: Option<Vec<String>>,
        child: Option<RecordV1>,
        weight: u64,
    }

    impl Struct for RecordV2 {
        const NAME: &'static str = "Record";

        fn encode_fields<'v>(&'v self, fields: &mut FieldWriter<'_, 'v>) {
            fields.write_u32(self.id);
            fields.write_bool(self.active);
            fields.write_string(&self.label);
            fields.write_opt_array(self.tags.as_deref());
            fields.write_opt_struct(self.child.as_ref());
            fields.write_u64(self.weight);
        }

        fn decode_fields(fields: &mut FieldReader<'_, '_>) -> Result<Self> {
            Ok(Self {
                id: fields.read_u32()?,
                active: fields.read_bool()?,
                label: fields.read_string()?,
                tags: fields.read_opt_array()?,
                child: fields.read_opt_struct()?,
                weight: fields.read_u64()?,
            })
        }
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Sample {
        flag: bool,
        small: i8,
        wide: u64,
        ratio: f64,
        bits: Vec<bool>,
        text: String,
        maybe: Option<String>,
        matrix: Vec<Vec<u16>>,
        children: Vec<Leaf>,
        nested: Option<Leaf>,
        scores: BTreeMap<u32, String>,
        aliases: Option<BTreeMap<String, Vec<u8>>>,
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Leaf {
        level: u16,
        note: Option<String>,
    }

    impl Struct for Leaf {
        const NAME: &'static str = "Leaf";

        fn encode_fields<'v>(&'v self, fields: &mut FieldWriter<'_, 'v>) {
            fields.write_u16(self.level);
            fields.write_opt_string(self.note.as_deref());
        }

        fn decode_fields(fields: &mut FieldReader<'_, '_>) -> Result<Self> {
            Ok(Self {
                level: fields.read_u16()?,
                note: fields.read_opt_string()?,
            })
        }
    }

    impl Struct for Sample {
        const NAME: &'static str = "Sample";

        fn encode_fields<'v>(&'v self, fields: &mut FieldWriter<'_, 'v>) {
            fields.write_bool(self.flag);
            fields.write_i8(self.small);
            fields.write_u64(self.wide);
            fields.write_f64(self.ratio);
            fields.write_array(&self.bits);
            fields.write_string(&self.text);
            fields.write_opt_string(self.maybe.as_deref());
            fields.write_array(&self.matrix);
            fields.write_struct_array(&self.children);
            fields.write_opt_struct(self.nested.as_ref());
            fields.write_map(&self.scores);
            fields.write_opt_map(self.aliases.as_ref());
        }

        fn decode_fields(fields: &mut FieldReader<'_, '_>) -> Result<Self> {
            Ok(Self {
                flag: fields.read_bool()?,
                small: fields.read_i8()?,
                wide: fields.read_u64()?,
                ratio: fields.read_f64()?,
                bits: fields.read_array()?,
                text: fields.read_string()?,
                maybe: fields.read_opt_string()?,
                matrix: fields.read_array()?,
                children: fields.read_struct_array()?,
                nested: fields.read_opt_struct()?,
                scores: fields.read_map()?,
                aliases: fields.read_opt_map()?,
            })
        }
    }

    fn leaf() -> impl Strategy<Value = Leaf> {
        (any::<u16>(), proptest::option::of("[a-z]{0,12}"))
            .prop_map(|(level, note)| Leaf { level, note })
    }

    fn sample() -> impl Strategy<Value = Sample> {
        (
            (any::<bool>(), any::<i8>(), any::<u64>(), -1.0e9f64..1.0e9),
            proptest::collection::vec(any::<bool>(), 0..40),
            ".{0,24}",
            proptest::option::of("[a-zA-Z0-9 ]{0,16}"),
            proptest::collection::vec(proptest::collection::vec(any::<u16>(), 0..5), 0..4),
            proptest::collection::vec(leaf(), 0..4),
            proptest::option::of(leaf()),
            proptest::collection::btree_map(any::<u32>(), "[a-z]{0,8}", 0..6),
            proptest::option::of(proptest::collection::btree_map(
                "[a-z]{1,6}",
                proptest::collection::vec(any::<u8>(), 0..6),
                0..4,
            )),
        )
            .prop_map(
                |(
                    (flag, small, wide, ratio),
                    bits,
                    text,
                    maybe,
                    matrix,
                    children,
                    nested,
                    scores,
                    aliases,
                )| Sample {
                    flag,
                    small,
                    wide,
                    ratio,
                    bits,
                    text,
                    maybe,
                    matrix,
                    children,
                    nested,
                    scores,
                    aliases,
                },
            )
    }

    #[test]
    fn end_to_end_point_with_handle() {
        let point = Point {
            x: 10,
            y: 20,
            name: "hi".to_string(),
            array: vec![1, 2],
            handle: Handle::from_raw(77),
        };

        let message = encode_message(&MessageHeader::new(4), point);
        assert_eq!(message.handles().len(), 1);

        let (header, decoded) = message.decode::<Point>().unwrap();
        assert_eq!(header.ordinal, 4);
        assert_eq!(decoded.x, 10);
        assert_eq!(decoded.y, 20);
        assert_eq!(decoded.name, "hi");
        assert_eq!(decoded.array, vec![1, 2]);
        assert_eq!(decoded.handle.raw(), 77);
    }

    #[test]
    fn request_header_roundtrip() {
        let message = encode_message(&MessageHeader::request(2, 99), RecordV1 { id: 5 });
        assert_eq!(message.header().unwrap().request_id, 99);

        let (header, record) = decode_message::<RecordV1>(message).unwrap();
        assert!(header.expects_response());
        assert_eq!(record, RecordV1 { id: 5 });
    }

    #[test]
    fn newer_sender_older_receiver() {
        let newer = RecordV2 {
            id: 42,
            active: true,
            label: "extra".to_string(),
            tags: Some(vec!["a".to_string(), "b".to_string()]),
            child: Some(RecordV1 { id: 1 }),
            weight: 9,
        };
        let decoded: RecordV1 = decode(encode(newer)).unwrap();
        assert_eq!(decoded, RecordV1 { id: 42 });
    }

    #[test]
    fn older_sender_newer_receiver() {
        let decoded: RecordV2 = decode(encode(RecordV1 { id: 7 })).unwrap();
        assert_eq!(
            decoded,
            RecordV2 {
                id: 7,
                ..RecordV2::default()
            }
        );
    }

    #[test]
    fn truncated_message_is_rejected() {
        let message = encode_message(
            &MessageHeader::new(1),
            Point {
                x: 1,
                y: 2,
                name: "name".to_string(),
                array: vec![3, 4, 5],
                handle: Handle::INVALID,
            },
        );
        let (bytes, _) = message.into_parts();

        let short = Message::new(bytes.slice(..bytes.len() - 4), Vec::new());
        assert_eq!(
            short.decode::<Point>().err(),
            Some(CodecError::InvalidMessageSize(bytes.len() - 4))
        );

        let short = Message::new(bytes.slice(..bytes.len() - 8), Vec::new());
        assert!(short.decode::<Point>().is_err());
    }

    #[test]
    fn missing_handle_is_rejected() {
        let message = encode(Point {
            handle: Handle::from_raw(3),
            ..Point::default()
        });
        let (bytes, _) = message.into_parts();
        assert_eq!(
            decode::<Point>(Message::new(bytes, Vec::new())).err(),
            Some(CodecError::InvalidHandleIndex {
                index: 0,
                available: 0
            })
        );
    }

    #[test]
    fn header_size_mismatch_is_rejected() {
        let message = encode_message(&MessageHeader::new(1), RecordV1 { id: 1 });
        let (bytes, _) = message.into_parts();
        let mut raw = bytes.to_vec();
        raw[0] = 16;
        assert!(matches!(
            decode_message::<RecordV1>(Message::new(raw, Vec::new())),
            Err(CodecError::InvalidMessageHeader(_))
        ));
    }

    proptest! {
        #[test]
        fn roundtrip_preserves_value(value in sample()) {
            let decoded: Sample = decode(encode(value.clone())).unwrap();
            prop_assert_eq!(decoded, value);
        }

        #[test]
        fn encoded_size_is_stride_aligned(value in sample()) {
            let message = encode_message(&MessageHeader::request(1, 1), value);
            prop_assert_eq!(message.len() % 8, 0);
        }

        #[test]
        fn any_truncation_is_rejected(value in sample(), cut in 1usize..64) {
            let (bytes, _) = encode(value).into_parts();
            let keep = bytes.len().saturating_sub(cut * 8);
            let short = Message::new(bytes.slice(..keep), Vec::new());
            prop_assert!(decode::<Sample>(short).is_err());
        }

        #[test]
        fn arbitrary_bytes_never_panic(words in proptest::collection::vec(any::<u64>(), 0..32)) {
            let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
            let _ = decode::<Sample>(Message::new(bytes.clone(), Vec::new()));
            let _ = decode_message::<Sample>(Message::new(bytes, Vec::new()));
        }
    }
}
