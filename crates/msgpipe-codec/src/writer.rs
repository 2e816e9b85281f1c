use std::collections::BTreeMap;

use bytes::BytesMut;
use msgpipe_transport::Handle;

use crate::codec::{
    align, Struct, ARRAY_HEADER_SIZE, ENCODED_INVALID_HANDLE, MAP_DATA_SIZE, POINTER_SIZE,
    STRUCT_HEADER_SIZE,
};
use crate::element::ArrayElement;
use crate::message::Message;

const INITIAL_BUFFER_CAPACITY: usize = 256;

/// A pointer slot waiting for its payload, plus the code that writes it.
type Deferred<'v> = (usize, Box<dyn FnOnce(&mut Encoder) + 'v>);

/// Growable message buffer with a write cursor.
///
/// Objects are laid out depth-first: a struct or array writes its inline
/// section, then each pointer payload in field order, each one finishing its
/// own payloads before the next starts. Offsets therefore only ever point
/// forward.
pub struct Encoder {
    buf: BytesMut,
    cursor: usize,
    bit_offset: u8,
    handles: Vec<Handle>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            cursor: 0,
            bit_offset: 0,
            handles: Vec::new(),
        }
    }

    /// Current write position.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Pad to the 8-byte stride and hand over bytes and handles.
    pub fn finish(mut self) -> Message {
        self.align_to(8);
        Message::new(self.buf.freeze(), self.handles)
    }

    /// Encode `value` as a struct at the next 8-byte boundary.
    pub fn encode_struct<S: Struct>(&mut self, value: &S) {
        let header = self.alloc(STRUCT_HEADER_SIZE, 8);
        let mut fields = FieldWriter::new(self);
        value.encode_fields(&mut fields);
        let (num_fields, deferred) = fields.into_parts();

        self.align_to(8);
        let num_bytes = (self.cursor - header) as u32;
        self.put_at(header, num_bytes.to_le_bytes());
        self.put_at(header + 4, num_fields.to_le_bytes());
        self.run_deferred(deferred);
    }

    /// Encode an array of plain elements.
    pub fn encode_array<T: ArrayElement>(&mut self, elements: &[T]) {
        self.encode_elements(elements.iter());
    }

    fn encode_elements<'a, T: ArrayElement + 'a>(
        &mut self,
        elements: impl ExactSizeIterator<Item = &'a T>,
    ) {
        let header = self.alloc(ARRAY_HEADER_SIZE, 8);
        let count = elements.len();
        let mut writer = FieldWriter::new(self);
        for element in elements {
            element.encode_element(&mut writer);
        }
        let (_, deferred) = writer.into_parts();
        self.finish_array(header, count, deferred);
    }

    /// Encode a map as its fixed map struct. Keys and values go out as two
    /// parallel arrays in key order.
    pub fn encode_map<K: ArrayElement, V: ArrayElement>(&mut self, map: &BTreeMap<K, V>) {
        let header = self.alloc(STRUCT_HEADER_SIZE, 8);
        let mut slots = FieldWriter::new(self);
        slots.put_pointer(move |encoder| encoder.encode_elements(map.keys()));
        slots.put_pointer(move |encoder| encoder.encode_elements(map.values()));
        let (_, deferred) = slots.into_parts();

        // The second header word is a version, not a field count.
        self.put_at(header, (MAP_DATA_SIZE as u32).to_le_bytes());
        self.put_at(header + 4, 0u32.to_le_bytes());
        self.run_deferred(deferred);
    }

    /// Encode an array of non-null struct pointers.
    pub fn encode_struct_array<S: Struct>(&mut self, elements: &[S]) {
        let header = self.alloc(ARRAY_HEADER_SIZE, 8);
        let mut writer = FieldWriter::new(self);
        for element in elements {
            writer.put_struct(element);
        }
        let (_, deferred) = writer.into_parts();
        self.finish_array(header, elements.len(), deferred);
    }

    /// Encode a byte array (also the wire form of strings).
    pub fn encode_bytes(&mut self, bytes: &[u8]) {
        let header = self.alloc(ARRAY_HEADER_SIZE, 8);
        let start = self.alloc(bytes.len(), 1);
        self.buf[start..start + bytes.len()].copy_from_slice(bytes);
        self.finish_array(header, bytes.len(), Vec::new());
    }

    fn finish_array(&mut self, header: usize, count: usize, deferred: Vec<Deferred<'_>>) {
        let end = self.cursor + usize::from(self.bit_offset > 0);
        self.align_to(8);
        self.put_at(header, ((end - header) as u32).to_le_bytes());
        self.put_at(header + 4, (count as u32).to_le_bytes());
        self.run_deferred(deferred);
    }

    fn run_deferred(&mut self, deferred: Vec<Deferred<'_>>) {
        for (slot, encode) in deferred {
            self.align_to(8);
            let relative = (self.cursor - slot) as u64;
            self.put_at(slot, relative.to_le_bytes());
            encode(self);
        }
    }

    /// Reserve `size` zeroed bytes at the next 8-byte boundary.
    pub(crate) fn reserve(&mut self, size: usize) -> usize {
        self.alloc(size, 8)
    }

    pub(crate) fn put_at<const N: usize>(&mut self, offset: usize, bytes: [u8; N]) {
        self.buf[offset..offset + N].copy_from_slice(&bytes);
    }

    fn alloc(&mut self, size: usize, alignment: usize) -> usize {
        self.close_bit_run();
        self.cursor = align(self.cursor, alignment);
        let offset = self.cursor;
        self.cursor += size;
        self.grow_to(self.cursor);
        offset
    }

    fn align_to(&mut self, alignment: usize) {
        self.close_bit_run();
        self.cursor = align(self.cursor, alignment);
        self.grow_to(self.cursor);
    }

    fn close_bit_run(&mut self) {
        if self.bit_offset > 0 {
            self.cursor += 1;
            self.bit_offset = 0;
        }
    }

    fn grow_to(&mut self, len: usize) {
        if self.buf.len() < len {
            self.buf.resize(len, 0);
        }
    }

    fn push_bool(&mut self, value: bool) {
        if self.bit_offset == 0 {
            self.grow_to(self.cursor + 1);
        }
        if value {
            self.buf[self.cursor] |= 1 << self.bit_offset;
        }
        self.bit_offset += 1;
        if self.bit_offset == 8 {
            self.cursor += 1;
            self.bit_offset = 0;
        }
    }

    fn push_scalar<const N: usize>(&mut self, bytes: [u8; N]) {
        let offset = self.alloc(N, N);
        self.put_at(offset, bytes);
    }

    fn push_handle(&mut self, handle: &Handle) {
        let encoded = if handle.is_valid() {
            let index = self.handles.len() as u32;
            self.handles.push(Handle::from_raw(handle.raw()));
            index
        } else {
            ENCODED_INVALID_HANDLE
        };
        self.push_scalar(encoded.to_le_bytes());
    }
}

macro_rules! scalar_fields {
    ($($write:ident => $ty:ty),* $(,)?) => {
        $(
            pub fn $write(&mut self, value: $ty) {
                self.begin_field();
                self.put_scalar(value.to_le_bytes());
            }
        )*
    };
}

/// Writes the inline section of one struct or array.
///
/// `write_*` methods each add one declared field (they are what a struct's
/// `encode_fields` calls). `put_*` methods write a bare value and are used
/// for array elements.
pub struct FieldWriter<'e, 'v> {
    encoder: &'e mut Encoder,
    deferred: Vec<Deferred<'v>>,
    written: u32,
}

impl<'e, 'v> FieldWriter<'e, 'v> {
    fn new(encoder: &'e mut Encoder) -> Self {
        Self {
            encoder,
            deferred: Vec::new(),
            written: 0,
        }
    }

    fn into_parts(self) -> (u32, Vec<Deferred<'v>>) {
        (self.written, self.deferred)
    }

    fn begin_field(&mut self) {
        self.written += 1;
    }

    pub fn put_bool(&mut self, value: bool) {
        self.encoder.push_bool(value);
    }

    pub fn put_scalar<const N: usize>(&mut self, bytes: [u8; N]) {
        self.encoder.push_scalar(bytes);
    }

    /// Append a handle slot. Valid handles are copied into the message's
    /// handle array; the caller gives up the value by encoding it.
    pub fn put_handle(&mut self, handle: &Handle) {
        self.encoder.push_handle(handle);
    }

    pub fn put_null_pointer(&mut self) {
        self.encoder.alloc(POINTER_SIZE, POINTER_SIZE);
    }

    /// Reserve a pointer slot whose payload `encode` writes once the
    /// enclosing inline section is complete.
    pub fn put_pointer(&mut self, encode: impl FnOnce(&mut Encoder) + 'v) {
        let slot = self.encoder.alloc(POINTER_SIZE, POINTER_SIZE);
        let encode: Box<dyn FnOnce(&mut Encoder) + 'v> = Box::new(encode);
        self.deferred.push((slot, encode));
    }

    pub fn put_string(&mut self, value: &'v str) {
        self.put_pointer(move |encoder| encoder.encode_bytes(value.as_bytes()));
    }

    pub fn put_array<T: ArrayElement>(&mut self, values: &'v [T]) {
        self.put_pointer(move |encoder| encoder.encode_array(values));
    }

    pub fn put_struct<S: Struct>(&mut self, value: &'v S) {
        self.put_pointer(move |encoder| encoder.encode_struct(value));
    }

    pub fn put_struct_array<S: Struct>(&mut self, values: &'v [S]) {
        self.put_pointer(move |encoder| encoder.encode_struct_array(values));
    }

    pub fn put_map<K: ArrayElement, V: ArrayElement>(&mut self, map: &'v BTreeMap<K, V>) {
        self.put_pointer(move |encoder| encoder.encode_map(map));
    }

    pub fn write_bool(&mut self, value: bool) {
        self.begin_field();
        self.put_bool(value);
    }

    scalar_fields! {
        write_i8 => i8,
        write_u8 => u8,
        write_i16 => i16,
        write_u16 => u16,
        write_i32 => i32,
        write_u32 => u32,
        write_i64 => i64,
        write_u64 => u64,
        write_f32 => f32,
        write_f64 => f64,
    }

    pub fn write_handle(&mut self, handle: &Handle) {
        self.begin_field();
        self.put_handle(handle);
    }

    pub fn write_string(&mut self, value: &'v str) {
        self.begin_field();
        self.put_string(value);
    }

    pub fn write_opt_string(&mut self, value: Option<&'v str>) {
        self.begin_field();
        match value {
            Some(value) => self.put_string(value),
            None => self.put_null_pointer(),
        }
    }

    pub fn write_array<T: ArrayElement>(&mut self, values: &'v [T]) {
        self.begin_field();
        self.put_array(values);
    }

    pub fn write_opt_array<T: ArrayElement>(&mut self, values: Option<&'v [T]>) {
        self.begin_field();
        match values {
            Some(values) => self.put_array(values),
            None => self.put_null_pointer(),
        }
    }

    pub fn write_struct<S: Struct>(&mut self, value: &'v S) {
        self.begin_field();
        self.put_struct(value);
    }

    pub fn write_opt_struct<S: Struct>(&mut self, value: Option<&'v S>) {
        self.begin_field();
        match value {
            Some(value) => self.put_struct(value),
            None => self.put_null_pointer(),
        }
    }

    pub fn write_struct_array<S: Struct>(&mut self, values: &'v [S]) {
        self.begin_field();
        self.put_struct_array(values);
    }

    pub fn write_map<K: ArrayElement, V: ArrayElement>(&mut self, map: &'v BTreeMap<K, V>) {
        self.begin_field();
        self.put_map(map);
    }

    pub fn write_opt_map<K: ArrayElement, V: ArrayElement>(
        &mut self,
        map: Option<&'v BTreeMap<K, V>>,
    ) {
        self.begin_field();
        match map {
            Some(map) => self.put_map(map),
            None => self.put_null_pointer(),
        }
    }
}
