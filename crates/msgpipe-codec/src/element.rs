use msgpipe_transport::Handle;

use crate::error::Result;
use crate::reader::FieldReader;
use crate::writer::FieldWriter;

/// A value that can be stored inline in an array.
///
/// Structs are not array elements directly; use
/// [`FieldWriter::write_struct_array`] and [`FieldReader::read_struct_array`]
/// for arrays of struct pointers.
pub trait ArrayElement: Sized {
    /// Inline size of one element in bits; bounds the element count an
    /// array header may claim for its payload.
    const ELEMENT_BITS: usize;

    fn encode_element<'v>(&'v self, writer: &mut FieldWriter<'_, 'v>);

    fn decode_element(reader: &mut FieldReader<'_, '_>) -> Result<Self>;
}

macro_rules! scalar_elements {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ArrayElement for $ty {
                const ELEMENT_BITS: usize = std::mem::size_of::<$ty>() * 8;

                fn encode_element<'v>(&'v self, writer: &mut FieldWriter<'_, 'v>) {
                    writer.put_scalar(self.to_le_bytes());
                }

                fn decode_element(reader: &mut FieldReader<'_, '_>) -> Result<Self> {
                    Ok(<$ty>::from_le_bytes(reader.take_scalar()?))
                }
            }
        )*
    };
}

scalar_elements!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

impl ArrayElement for bool {
    const ELEMENT_BITS: usize = 1;

    fn encode_element<'v>(&'v self, writer: &mut FieldWriter<'_, 'v>) {
        writer.put_bool(*self);
    }

    fn decode_element(reader: &mut FieldReader<'_, '_>) -> Result<Self> {
        reader.take_bool()
    }
}

impl ArrayElement for Handle {
    const ELEMENT_BITS: usize = 32;

    fn encode_element<'v>(&'v self, writer: &mut FieldWriter<'_, 'v>) {
        writer.put_handle(self);
    }

    fn decode_element(reader: &mut FieldReader<'_, '_>) -> Result<Self> {
        reader.take_handle()
    }
}

impl ArrayElement for String {
    const ELEMENT_BITS: usize = 64;

    fn encode_element<'v>(&'v self, writer: &mut FieldWriter<'_, 'v>) {
        writer.put_string(self);
    }

    fn decode_element(reader: &mut FieldReader<'_, '_>) -> Result<Self> {
        reader.take_string()
    }
}

impl ArrayElement for Option<String> {
    const ELEMENT_BITS: usize = 64;

    fn encode_element<'v>(&'v self, writer: &mut FieldWriter<'_, 'v>) {
        match self.as_deref() {
            Some(value) => writer.put_string(value),
            None => writer.put_null_pointer(),
        }
    }

    fn decode_element(reader: &mut FieldReader<'_, '_>) -> Result<Self> {
        reader.take_opt_string()
    }
}

impl<T: ArrayElement> ArrayElement for Vec<T> {
    const ELEMENT_BITS: usize = 64;

    fn encode_element<'v>(&'v self, writer: &mut FieldWriter<'_, 'v>) {
        writer.put_array(self.as_slice());
    }

    fn decode_element(reader: &mut FieldReader<'_, '_>) -> Result<Self> {
        reader.take_array()
    }
}
