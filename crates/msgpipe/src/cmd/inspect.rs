use msgpipe::codec::{
    CodecError, Decoder, FieldReader, FieldWriter, MessageHeader, Result as CodecResult, Struct,
};
use serde::Serialize;
use tracing::debug;

use crate::cmd::InspectArgs;
use crate::exit::{codec_error, io_error, CliResult, SUCCESS};
use crate::output::{hex_words, print_fields, print_json, OutputFormat};

/// Accepts any struct payload; only its header and extent are checked.
struct Opaque;

impl Struct for Opaque {
    const NAME: &'static str = "payload";

    fn encode_fields<'v>(&'v self, _: &mut FieldWriter<'_, 'v>) {}

    fn decode_fields(_: &mut FieldReader<'_, '_>) -> CodecResult<Self> {
        Ok(Opaque)
    }
}

#[derive(Serialize)]
struct HeaderOutput {
    version: u32,
    size: usize,
    interface_id: u32,
    ordinal: u32,
    flags: u32,
    expects_response: bool,
    is_response: bool,
    request_id: u64,
}

impl From<&MessageHeader> for HeaderOutput {
    fn from(header: &MessageHeader) -> Self {
        Self {
            version: header.version(),
            size: header.encoded_size(),
            interface_id: header.interface_id,
            ordinal: header.ordinal,
            flags: header.flags,
            expects_response: header.expects_response(),
            is_response: header.is_response(),
            request_id: header.request_id,
        }
    }
}

#[derive(Serialize)]
struct PayloadOutput {
    offset: usize,
    num_bytes: u32,
    num_fields: u32,
}

#[derive(Serialize)]
struct InspectOutput {
    file: String,
    len: usize,
    header: Option<HeaderOutput>,
    payload: PayloadOutput,
    /// Bytes past the payload struct: pointed-to strings, arrays and structs.
    trailing_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    hex: Option<Vec<String>>,
}

pub fn run(args: InspectArgs, format: OutputFormat) -> CliResult<i32> {
    let context = format!("inspect {}", args.file.display());
    let data = std::fs::read(&args.file).map_err(|err| io_error(&context, err))?;
    debug!(len = data.len(), bare = args.bare, "inspecting message");

    let (header, payload) = layout(&data, args.bare).map_err(|err| codec_error(&context, err))?;

    let out = InspectOutput {
        file: args.file.display().to_string(),
        len: data.len(),
        header: header.as_ref().map(HeaderOutput::from),
        trailing_bytes: data.len() - payload.offset - payload.num_bytes as usize,
        payload,
        hex: args.hex.then(|| hex_words(&data)),
    };
    print_inspect(&out, format);
    Ok(SUCCESS)
}

/// Parse the header (unless `bare`) and validate the payload struct header.
fn layout(data: &[u8], bare: bool) -> CodecResult<(Option<MessageHeader>, PayloadOutput)> {
    if data.len() % 8 != 0 {
        return Err(CodecError::InvalidMessageSize(data.len()));
    }
    let header = if bare {
        None
    } else {
        Some(MessageHeader::parse(data)?)
    };
    let offset = header.as_ref().map_or(0, MessageHeader::encoded_size);

    let mut no_handles = Vec::new();
    Decoder::new(data, &mut no_handles).decode_struct_at::<Opaque>(offset)?;

    // decode_struct_at has bounds-checked the 8-byte header.
    let word = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
    Ok((
        header,
        PayloadOutput {
            offset,
            num_bytes: word(offset),
            num_fields: word(offset + 4),
        },
    ))
}

fn print_inspect(out: &InspectOutput, format: OutputFormat) {
    if let OutputFormat::Json = format {
        print_json(out);
        return;
    }

    let mut fields = vec![("file", out.file.clone()), ("len", out.len.to_string())];
    if let Some(header) = &out.header {
        fields.extend([
            ("header.version", header.version.to_string()),
            ("header.interface_id", header.interface_id.to_string()),
            ("header.ordinal", header.ordinal.to_string()),
            ("header.flags", format!("{:#x}", header.flags)),
            ("header.request_id", header.request_id.to_string()),
        ]);
    }
    fields.extend([
        ("payload.offset", out.payload.offset.to_string()),
        ("payload.num_bytes", out.payload.num_bytes.to_string()),
        ("payload.num_fields", out.payload.num_fields.to_string()),
        ("trailing_bytes", out.trailing_bytes.to_string()),
    ]);
    print_fields(&fields, format);

    if let Some(lines) = &out.hex {
        for (index, line) in lines.iter().enumerate() {
            println!("{:06x}  {line}", index * 8);
        }
    }
}

#[cfg(test)]
mod tests {
    use msgpipe::codec::{encode, encode_message};
    use msgpipe::demo::LogLine;

    use super::*;

    fn line(text: &str) -> LogLine {
        LogLine {
            text: text.to_string(),
        }
    }

    #[test]
    fn layout_reads_request_header_and_payload() {
        let message = encode_message(&MessageHeader::request(1, 9), line("abc"));
        let (header, payload) = layout(message.bytes(), false).unwrap();

        let header = header.unwrap();
        assert_eq!((header.ordinal, header.request_id), (1, 9));
        assert_eq!(payload.offset, 32);
        assert_eq!((payload.num_bytes, payload.num_fields), (16, 1));
    }

    #[test]
    fn bare_layout_starts_at_zero() {
        let message = encode(line(""));
        let (header, payload) = layout(message.bytes(), true).unwrap();
        assert!(header.is_none());
        assert_eq!(payload.offset, 0);
    }

    #[test]
    fn odd_length_is_rejected() {
        assert_eq!(
            layout(&[0u8; 12], true).err(),
            Some(CodecError::InvalidMessageSize(12))
        );
    }
}
