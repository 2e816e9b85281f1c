use std::collections::BTreeMap;

use msgpipe_transport::Handle;

use crate::codec::{
    align, Struct, ARRAY_HEADER_SIZE, ENCODED_INVALID_HANDLE, MAP_DATA_SIZE, POINTER_SIZE,
    STRUCT_HEADER_SIZE,
};
use crate::element::ArrayElement;
use crate::error::{CodecError, Result};

/// Bounds-checked view over an encoded message.
///
/// Objects must be decoded in increasing offset order, each starting on an
/// 8-byte boundary past everything already claimed. Handle indices must be
/// strictly increasing. Both rules reject overlapping or aliased payloads
/// before any of their bytes are interpreted.
pub struct Decoder<'m> {
    data: &'m [u8],
    handles: &'m mut [Handle],
    next_handle: u32,
    claimed: usize,
}

impl<'m> Decoder<'m> {
    pub fn new(data: &'m [u8], handles: &'m mut [Handle]) -> Self {
        Self {
            data,
            handles,
            next_handle: 0,
            claimed: 0,
        }
    }

    /// Number of bytes claimed by decoded objects so far.
    pub fn claimed(&self) -> usize {
        self.claimed
    }

    /// Mark `[offset, offset + size)` as consumed, padded to the stride.
    pub(crate) fn claim(&mut self, offset: usize, size: usize) -> Result<()> {
        if offset % 8 != 0 {
            return Err(CodecError::MisalignedObject(offset));
        }
        if offset < self.claimed {
            return Err(CodecError::OverlappingObject {
                offset,
                claimed: self.claimed,
            });
        }
        let end = offset
            .checked_add(align(size, 8))
            .filter(|end| *end <= self.data.len())
            .ok_or(CodecError::ObjectOutOfBounds {
                offset,
                size,
                len: self.data.len(),
            })?;
        self.claimed = end;
        Ok(())
    }

    /// Read an 8-byte object header and claim the object it describes.
    fn object_header(&mut self, offset: usize) -> Result<(u32, u32)> {
        if offset % 8 != 0 {
            return Err(CodecError::MisalignedObject(offset));
        }
        if offset < self.claimed {
            return Err(CodecError::OverlappingObject {
                offset,
                claimed: self.claimed,
            });
        }
        let header = self
            .data
            .get(offset..offset + STRUCT_HEADER_SIZE)
            .ok_or(CodecError::Truncated {
                offset,
                needed: STRUCT_HEADER_SIZE,
                available: self.data.len().saturating_sub(offset),
            })?;
        let num_bytes = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let count = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        self.claim(offset, num_bytes as usize)?;
        Ok((num_bytes, count))
    }

    pub fn decode_struct_at<S: Struct>(&mut self, offset: usize) -> Result<S> {
        let (num_bytes, num_fields) = self.object_header(offset)?;
        if (num_bytes as usize) < STRUCT_HEADER_SIZE {
            return Err(CodecError::InvalidStructHeader {
                num_bytes,
                num_fields,
            });
        }
        let end = offset + num_bytes as usize;
        let mut fields = FieldReader::new(self, offset + STRUCT_HEADER_SIZE, end, num_fields);
        S::decode_fields(&mut fields)
    }

    pub fn decode_array_at<T: ArrayElement>(&mut self, offset: usize) -> Result<Vec<T>> {
        let (end, num_elements) = self.array_header(offset, |payload| {
            payload.saturating_mul(8) / T::ELEMENT_BITS
        })?;
        let mut elements = FieldReader::new(self, offset + ARRAY_HEADER_SIZE, end, 0);
        let mut values = Vec::with_capacity(num_elements);
        for _ in 0..num_elements {
            values.push(T::decode_element(&mut elements)?);
        }
        Ok(values)
    }

    pub fn decode_struct_array_at<S: Struct>(&mut self, offset: usize) -> Result<Vec<S>> {
        let (end, num_elements) = self.array_header(offset, |payload| payload / POINTER_SIZE)?;
        let mut elements = FieldReader::new(self, offset + ARRAY_HEADER_SIZE, end, 0);
        let mut values = Vec::with_capacity(num_elements);
        for _ in 0..num_elements {
            values.push(elements.take_struct()?);
        }
        Ok(values)
    }

    /// Decode a map struct. Its keys and values arrays must have the same
    /// length; a repeated key is rejected.
    pub fn decode_map_at<K: ArrayElement + Ord, V: ArrayElement>(
        &mut self,
        offset: usize,
    ) -> Result<BTreeMap<K, V>> {
        let (num_bytes, version) = self.object_header(offset)?;
        if num_bytes as usize != MAP_DATA_SIZE || version != 0 {
            return Err(CodecError::InvalidMapHeader { num_bytes, version });
        }
        let end = offset + MAP_DATA_SIZE;
        let mut slots = FieldReader::new(self, offset + STRUCT_HEADER_SIZE, end, 0);
        let keys: Vec<K> = slots.take_array()?;
        let values: Vec<V> = slots.take_array()?;
        if keys.len() != values.len() {
            return Err(CodecError::MapLengthMismatch {
                keys: keys.len(),
                values: values.len(),
            });
        }

        let mut map = BTreeMap::new();
        for (index, (key, value)) in keys.into_iter().zip(values).enumerate() {
            if map.insert(key, value).is_some() {
                return Err(CodecError::DuplicateMapKey { index });
            }
        }
        Ok(map)
    }

    pub fn decode_bytes_at(&mut self, offset: usize) -> Result<Vec<u8>> {
        let (_, num_elements) = self.array_header(offset, |payload| payload)?;
        let start = offset + ARRAY_HEADER_SIZE;
        Ok(self.data[start..start + num_elements].to_vec())
    }

    /// Validate an array header; `capacity` maps the payload size to the
    /// most elements it can hold. Returns the payload end and element count.
    fn array_header(&mut self, offset: usize, capacity: impl Fn(usize) -> usize) -> Result<(usize, usize)> {
        let (num_bytes, num_elements) = self.object_header(offset)?;
        let invalid = CodecError::InvalidArrayHeader {
            num_bytes,
            num_elements,
        };
        let payload = (num_bytes as usize)
            .checked_sub(ARRAY_HEADER_SIZE)
            .ok_or_else(|| invalid.clone())?;
        if num_elements as usize > capacity(payload) {
            return Err(invalid);
        }
        Ok((offset + num_bytes as usize, num_elements as usize))
    }

    /// Move the handle at `index` out of the message.
    fn take_handle(&mut self, index: u32) -> Result<Handle> {
        if index as usize >= self.handles.len() {
            return Err(CodecError::InvalidHandleIndex {
                index,
                available: self.handles.len(),
            });
        }
        if index < self.next_handle {
            return Err(CodecError::HandleOutOfOrder { index });
        }
        self.next_handle = index + 1;
        Ok(self.handles[index as usize].take())
    }
}

macro_rules! scalar_fields {
    ($($read:ident => $ty:ty),* $(,)?) => {
        $(
            pub fn $read(&mut self) -> Result<$ty> {
                if !self.next_field() {
                    return Ok(<$ty>::default());
                }
                Ok(<$ty>::from_le_bytes(self.take_scalar()?))
            }
        )*
    };
}

/// Reads the inline section of one struct or array.
///
/// `read_*` methods consume one declared field and fall back to the field's
/// default once the sender's struct has no more fields, so older payloads
/// decode into newer schemas. `take_*` methods read a bare value and are
/// used for array elements.
pub struct FieldReader<'d, 'm> {
    decoder: &'d mut Decoder<'m>,
    cursor: usize,
    bit_offset: u8,
    end: usize,
    remaining: u32,
}

impl<'d, 'm> FieldReader<'d, 'm> {
    fn new(decoder: &'d mut Decoder<'m>, start: usize, end: usize, num_fields: u32) -> Self {
        Self {
            decoder,
            cursor: start,
            bit_offset: 0,
            end,
            remaining: num_fields,
        }
    }

    fn next_field(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    /// Advance to the next `size`-aligned slot and return its offset.
    fn slot(&mut self, size: usize) -> Result<usize> {
        if self.bit_offset > 0 {
            self.cursor += 1;
            self.bit_offset = 0;
        }
        let offset = align(self.cursor, size);
        if offset + size > self.end {
            return Err(CodecError::Truncated {
                offset,
                needed: size,
                available: self.end.saturating_sub(offset),
            });
        }
        self.cursor = offset + size;
        Ok(offset)
    }

    pub fn take_bool(&mut self) -> Result<bool> {
        if self.cursor >= self.end {
            return Err(CodecError::Truncated {
                offset: self.cursor,
                needed: 1,
                available: 0,
            });
        }
        let bit = (self.decoder.data[self.cursor] >> self.bit_offset) & 1 == 1;
        self.bit_offset += 1;
        if self.bit_offset == 8 {
            self.cursor += 1;
            self.bit_offset = 0;
        }
        Ok(bit)
    }

    pub fn take_scalar<const N: usize>(&mut self) -> Result<[u8; N]> {
        let offset = self.slot(N)?;
        let mut raw = [0u8; N];
        raw.copy_from_slice(&self.decoder.data[offset..offset + N]);
        Ok(raw)
    }

    pub fn take_handle(&mut self) -> Result<Handle> {
        let index = u32::from_le_bytes(self.take_scalar()?);
        if index == ENCODED_INVALID_HANDLE {
            return Ok(Handle::INVALID);
        }
        self.decoder.take_handle(index)
    }

    /// Read a pointer slot and resolve it to an absolute offset.
    pub fn take_pointer(&mut self) -> Result<Option<usize>> {
        let slot = self.slot(POINTER_SIZE)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.decoder.data[slot..slot + POINTER_SIZE]);
        let relative = u64::from_le_bytes(raw);
        if relative == 0 {
            return Ok(None);
        }
        let len = self.decoder.data.len();
        let target = (slot as u64).saturating_add(relative);
        if target >= len as u64 {
            return Err(CodecError::PointerOutOfBounds { target, len });
        }
        Ok(Some(target as usize))
    }

    fn require(&mut self, what: &'static str) -> Result<usize> {
        self.take_pointer()?.ok_or(CodecError::UnexpectedNullPointer(what))
    }

    pub fn take_string(&mut self) -> Result<String> {
        let target = self.require("string")?;
        decode_string(self.decoder, target)
    }

    pub fn take_opt_string(&mut self) -> Result<Option<String>> {
        match self.take_pointer()? {
            Some(target) => decode_string(self.decoder, target).map(Some),
            None => Ok(None),
        }
    }

    pub fn take_array<T: ArrayElement>(&mut self) -> Result<Vec<T>> {
        let target = self.require("array")?;
        self.decoder.decode_array_at(target)
    }

    pub fn take_struct<S: Struct>(&mut self) -> Result<S> {
        let target = self.require(S::NAME)?;
        self.decoder.decode_struct_at(target)
    }

    pub fn take_struct_array<S: Struct>(&mut self) -> Result<Vec<S>> {
        let target = self.require("array")?;
        self.decoder.decode_struct_array_at(target)
    }

    pub fn take_map<K: ArrayElement + Ord, V: ArrayElement>(&mut self) -> Result<BTreeMap<K, V>> {
        let target = self.require("map")?;
        self.decoder.decode_map_at(target)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        if !self.next_field() {
            return Ok(false);
        }
        self.take_bool()
    }

    scalar_fields! {
        read_i8 => i8,
        read_u8 => u8,
        read_i16 => i16,
        read_u16 => u16,
        read_i32 => i32,
        read_u32 => u32,
        read_i64 => i64,
        read_u64 => u64,
        read_f32 => f32,
        read_f64 => f64,
    }

    pub fn read_handle(&mut self) -> Result<Handle> {
        if !self.next_field() {
            return Ok(Handle::INVALID);
        }
        self.take_handle()
    }

    pub fn read_string(&mut self) -> Result<String> {
        if !self.next_field() {
            return Ok(String::new());
        }
        self.take_string()
    }

    pub fn read_opt_string(&mut self) -> Result<Option<String>> {
        if !self.next_field() {
            return Ok(None);
        }
        self.take_opt_string()
    }

    pub fn read_array<T: ArrayElement>(&mut self) -> Result<Vec<T>> {
        if !self.next_field() {
            return Ok(Vec::new());
        }
        self.take_array()
    }

    pub fn read_opt_array<T: ArrayElement>(&mut self) -> Result<Option<Vec<T>>> {
        if !self.next_field() {
            return Ok(None);
        }
        match self.take_pointer()? {
            Some(target) => self.decoder.decode_array_at(target).map(Some),
            None => Ok(None),
        }
    }

    pub fn read_struct<S: Struct + Default>(&mut self) -> Result<S> {
        if !self.next_field() {
            return Ok(S::default());
        }
        self.take_struct()
    }

    pub fn read_opt_struct<S: Struct>(&mut self) -> Result<Option<S>> {
        if !self.next_field() {
            return Ok(None);
        }
        match self.take_pointer()? {
            Some(target) => self.decoder.decode_struct_at(target).map(Some),
            None => Ok(None),
        }
    }

    pub fn read_struct_array<S: Struct>(&mut self) -> Result<Vec<S>> {
        if !self.next_field() {
            return Ok(Vec::new());
        }
        self.take_struct_array()
    }

    pub fn read_map<K: ArrayElement + Ord, V: ArrayElement>(&mut self) -> Result<BTreeMap<K, V>> {
        if !self.next_field() {
            return Ok(BTreeMap::new());
        }
        self.take_map()
    }

    pub fn read_opt_map<K: ArrayElement + Ord, V: ArrayElement>(
        &mut self,
    ) -> Result<Option<BTreeMap<K, V>>> {
        if !self.next_field() {
            return Ok(None);
        }
        match self.take_pointer()? {
            Some(target) => self.decoder.decode_map_at(target).map(Some),
            None => Ok(None),
        }
    }
}

fn decode_string(decoder: &mut Decoder<'_>, offset: usize) -> Result<String> {
    let bytes = decoder.decode_bytes_at(offset)?;
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::FieldWriter;

    #[derive(Debug, Default, PartialEq)]
    struct Leaf {
        value: u32,
    }

    impl Struct for Leaf {
        const NAME: &'static str = "Leaf";

        fn encode_fields<'v>(&'v self, fields: &mut FieldWriter<'_, 'v>) {
            fields.write_u32(self.value);
        }

        fn decode_fields(fields: &mut FieldReader<'_, '_>) -> Result<Self> {
            Ok(Self {
                value: fields.read_u32()?,
            })
        }
    }

    #[derive(Debug, Default, PartialEq)]
    struct Tree {
        name: String,
        leaf: Leaf,
    }

    impl Struct for Tree {
        const NAME: &'static str = "Tree";

        fn encode_fields<'v>(&'v self, fields: &mut FieldWriter<'_, 'v>) {
            fields.write_string(&self.name);
            fields.write_struct(&self.leaf);
        }

        fn decode_fields(fields: &mut FieldReader<'_, '_>) -> Result<Self> {
            Ok(Self {
                name: fields.read_string()?,
                leaf: fields.read_struct()?,
            })
        }
    }

    fn words(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    fn decode_tree(data: &[u8]) -> Result<Tree> {
        let mut handles = Vec::new();
        Decoder::new(data, &mut handles).decode_struct_at(0)
    }

    #[test]
    fn decode_nested_struct() {
        // Tree { name: "ab", leaf: Leaf { value: 7 } }
        let data = words(&[
            24, 2, // tree header
            16, 0, // name -> 24
            24, 0, // leaf -> 40
            10, 2, // string header
            u32::from_le_bytes([b'a', b'b', 0, 0]), 0,
            16, 1, // leaf header
            7, 0,
        ]);
        let tree = decode_tree(&data).unwrap();
        assert_eq!(tree.name, "ab");
        assert_eq!(tree.leaf, Leaf { value: 7 });
    }

    #[test]
    fn reject_struct_header_too_small() {
        let data = words(&[4, 0]);
        assert_eq!(
            decode_tree(&data),
            Err(CodecError::InvalidStructHeader {
                num_bytes: 4,
                num_fields: 0
            })
        );
    }

    #[test]
    fn reject_struct_past_buffer_end() {
        let data = words(&[64, 2, 0, 0]);
        assert!(matches!(
            decode_tree(&data),
            Err(CodecError::ObjectOutOfBounds { offset: 0, size: 64, .. })
        ));
    }

    #[test]
    fn reject_pointer_past_buffer_end() {
        let data = words(&[24, 2, 0x100, 0, 0, 0]);
        assert_eq!(
            decode_tree(&data),
            Err(CodecError::PointerOutOfBounds { target: 0x108, len: 24 })
        );
    }

    #[test]
    fn reject_misaligned_object() {
        let data = words(&[24, 2, 20, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(decode_tree(&data), Err(CodecError::MisalignedObject(28)));
    }

    #[test]
    fn reject_pointer_back_into_struct() {
        // name points at the tree's own header region
        let data = words(&[24, 2, 0, 0, 0, 0]);
        let mut data = data;
        data[8..16].copy_from_slice(&8u64.to_le_bytes());
        assert_eq!(
            decode_tree(&data),
            Err(CodecError::OverlappingObject {
                offset: 16,
                claimed: 24
            })
        );
    }

    #[test]
    fn reject_two_pointers_to_one_object() {
        let data = words(&[
            24, 2, //
            16, 0, // name -> 24
            16, 0, // leaf -> 32, inside the string
            12, 4, //
            0, 0,
        ]);
        assert!(matches!(
            decode_tree(&data),
            Err(CodecError::OverlappingObject { offset: 32, .. })
        ));
    }

    #[test]
    fn reject_null_required_field() {
        let data = words(&[24, 2, 0, 0, 0, 0]);
        assert_eq!(
            decode_tree(&data),
            Err(CodecError::UnexpectedNullPointer("string"))
        );
    }

    #[test]
    fn reject_array_count_beyond_size() {
        let data = words(&[24, 2, 16, 0, 0, 0, 9, 5, 0, 0]);
        assert_eq!(
            decode_tree(&data),
            Err(CodecError::InvalidArrayHeader {
                num_bytes: 9,
                num_elements: 5
            })
        );
    }

    #[test]
    fn reject_invalid_utf8() {
        let data = words(&[24, 2, 16, 0, 0, 0, 10, 2, 0x0000_FFFF, 0]);
        assert!(matches!(decode_tree(&data), Err(CodecError::InvalidUtf8(_))));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let data = words(&[8, 0]);
        assert_eq!(decode_tree(&data).unwrap(), Tree::default());
    }

    #[test]
    fn handle_index_checks() {
        struct Two(Handle, Handle);

        impl Struct for Two {
            const NAME: &'static str = "Two";

            fn encode_fields<'v>(&'v self, fields: &mut FieldWriter<'_, 'v>) {
                fields.write_handle(&self.0);
                fields.write_handle(&self.1);
            }

            fn decode_fields(fields: &mut FieldReader<'_, '_>) -> Result<Self> {
                Ok(Self(fields.read_handle()?, fields.read_handle()?))
            }
        }

        let decode = |first: u32, second: u32| {
            let data = words(&[16, 2, first, second]);
            let mut handles = vec![Handle::from_raw(10), Handle::from_raw(11)];
            Decoder::new(&data, &mut handles).decode_struct_at::<Two>(0)
        };

        let ok = decode(0, 1).unwrap();
        assert_eq!((ok.0.raw(), ok.1.raw()), (10, 11));

        let skipped = decode(ENCODED_INVALID_HANDLE, 1).unwrap();
        assert!(!skipped.0.is_valid());
        assert_eq!(skipped.1.raw(), 11);

        assert_eq!(
            decode(1, 0).err(),
            Some(CodecError::HandleOutOfOrder { index: 0 })
        );
        assert_eq!(
            decode(0, 0).err(),
            Some(CodecError::HandleOutOfOrder { index: 0 })
        );
        assert_eq!(
            decode(0, 2).err(),
            Some(CodecError::InvalidHandleIndex {
                index: 2,
                available: 2
            })
        );
    }

    #[test]
    fn array_count_is_bounded_by_element_size() {
        let data = words(&[16, 2, 0, 0]);
        let mut handles = Vec::new();
        assert_eq!(
            Decoder::new(&data, &mut handles).decode_array_at::<String>(0),
            Err(CodecError::InvalidArrayHeader {
                num_bytes: 16,
                num_elements: 2
            })
        );

        let data = words(&[16, 3, 1, 2]);
        assert_eq!(
            Decoder::new(&data, &mut handles).decode_array_at::<u32>(0),
            Err(CodecError::InvalidArrayHeader {
                num_bytes: 16,
                num_elements: 3
            })
        );

        let data = words(&[16, 2, 1, 2]);
        assert_eq!(
            Decoder::new(&data, &mut handles).decode_array_at::<u32>(0),
            Ok(vec![1, 2])
        );
    }

    #[derive(Debug, Default, PartialEq)]
    struct Counts {
        counts: BTreeMap<u8, u32>,
    }

    impl Struct for Counts {
        const NAME: &'static str = "Counts";

        fn encode_fields<'v>(&'v self, fields: &mut FieldWriter<'_, 'v>) {
            fields.write_map(&self.counts);
        }

        fn decode_fields(fields: &mut FieldReader<'_, '_>) -> Result<Self> {
            Ok(Self {
                counts: fields.read_map()?,
            })
        }
    }

    /// `Counts` with keys `[k0, k1]` and the given values array words.
    fn counts_message(keys: [u8; 2], values: &[u32]) -> Vec<u8> {
        let mut data = words(&[
            16, 1, //
            8, 0, // counts -> 16
            24, 0, // map header
            16, 0, // keys -> 40
            24, 0, // values -> 56
            10, 2, // keys array
            u32::from_le_bytes([keys[0], keys[1], 0, 0]), 0,
        ]);
        data.extend(words(values));
        data
    }

    fn decode_counts(data: &[u8]) -> Result<Counts> {
        let mut handles = Vec::new();
        Decoder::new(data, &mut handles).decode_struct_at(0)
    }

    #[test]
    fn decode_map_layout() {
        let data = counts_message([1, 2], &[16, 2, 7, 8]);
        let counts = decode_counts(&data).unwrap();
        assert_eq!(counts.counts, BTreeMap::from([(1, 7), (2, 8)]));

        let encoded = crate::codec::encode(counts);
        assert_eq!(encoded.bytes(), data.as_slice());
    }

    #[test]
    fn reject_map_length_mismatch() {
        let data = counts_message([1, 2], &[12, 1, 7, 0]);
        assert_eq!(
            decode_counts(&data),
            Err(CodecError::MapLengthMismatch { keys: 2, values: 1 })
        );
    }

    #[test]
    fn reject_duplicate_map_key() {
        let data = counts_message([3, 3], &[16, 2, 7, 8]);
        assert_eq!(
            decode_counts(&data),
            Err(CodecError::DuplicateMapKey { index: 1 })
        );
    }

    #[test]
    fn reject_bad_map_header() {
        let data = words(&[16, 1, 8, 0, 24, 1, 0, 0, 0, 0]);
        assert_eq!(
            decode_counts(&data),
            Err(CodecError::InvalidMapHeader {
                num_bytes: 24,
                version: 1
            })
        );

        let data = words(&[16, 1, 8, 0, 16, 0, 0, 0]);
        assert_eq!(
            decode_counts(&data),
            Err(CodecError::InvalidMapHeader {
                num_bytes: 16,
                version: 0
            })
        );
    }

    #[test]
    fn reject_null_map_arrays() {
        let data = words(&[16, 1, 8, 0, 24, 0, 0, 0, 0, 0]);
        assert_eq!(
            decode_counts(&data),
            Err(CodecError::UnexpectedNullPointer("array"))
        );
    }

    #[test]
    fn absent_map_field_is_empty() {
        assert_eq!(decode_counts(&words(&[8, 0])).unwrap(), Counts::default());
    }

}
