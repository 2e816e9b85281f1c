use std::fmt;
use std::io;

use msgpipe::bindings::BindingsError;
use msgpipe::codec::CodecError;
use msgpipe::transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const NOT_FOUND: i32 = 66;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::NotFound => NOT_FOUND,
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
}

pub fn codec_error(context: &str, err: CodecError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn bindings_error(context: &str, err: BindingsError) -> CliError {
    match err {
        BindingsError::Transport(err) => transport_error(context, err),
        BindingsError::Codec(err) => codec_error(context, err),
        BindingsError::Malformed(_) | BindingsError::UnknownOrdinal(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_failures_are_data_invalid() {
        let err = bindings_error("decode", BindingsError::Codec(CodecError::InvalidMessageSize(13)));
        assert_eq!(err.code, DATA_INVALID);
        assert!(err.message.starts_with("decode: "));
    }

    #[test]
    fn transport_failures_keep_their_code() {
        let err = bindings_error("write", BindingsError::Transport(TransportError::PeerClosed));
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert_eq!(bindings_error("call", BindingsError::Closed).code, FAILURE);
    }

    #[test]
    fn missing_file_maps_to_not_found() {
        let err = io_error("read", io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(err.code, NOT_FOUND);
    }
}
