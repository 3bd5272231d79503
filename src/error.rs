use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    Decode(&'static str, io::Error),
    Encode(&'static str, io::Error),
    /// Header, tail or index structure does not match the container format.
    InvalidFormat(String),
    ShortWrite { expected: usize, written: usize },
    ShortRead { expected: usize, read: usize },
    /// Caller broke the sink/source protocol (double close, unknown type, ...).
    ProtocolMisuse(String),
    /// A read-time integrity check failed, or a packed batch cannot be decoded.
    CorruptData(String),
    Schema(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Schema(format!("bad schema description: {}", err))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::Decode(field, err) => write!(f, "Failed to decode {}: {}", field, err),
            Error::Encode(field, err) => write!(f, "Failed to encode {}: {}", field, err),
            Error::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),
            Error::ShortWrite { expected, written } => {
                write!(f, "Short write: wrote {} of {} bytes", written, expected)
            }
            Error::ShortRead { expected, read } => {
                write!(f, "Short read: read {} of {} bytes", read, expected)
            }
            Error::ProtocolMisuse(msg) => write!(f, "Protocol misuse: {}", msg),
            Error::CorruptData(msg) => write!(f, "Corrupt data: {}", msg),
            Error::Schema(msg) => write!(f, "Schema error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) | Error::Decode(_, err) | Error::Encode(_, err) => Some(err),
            _ => None,
        }
    }
}

impl Error {
    /// Worker errors are stored once and handed to every waiter, so they
    /// must be duplicable even though `io::Error` is not `Clone`.
    pub(crate) fn duplicate(&self) -> Error {
        let io_copy = |err: &io::Error| io::Error::new(err.kind(), err.to_string());
        match self {
            Error::IoError(err) => Error::IoError(io_copy(err)),
            Error::Decode(field, err) => Error::Decode(field, io_copy(err)),
            Error::Encode(field, err) => Error::Encode(field, io_copy(err)),
            Error::InvalidFormat(msg) => Error::InvalidFormat(msg.clone()),
            Error::ShortWrite { expected, written } => Error::ShortWrite {
                expected: *expected,
                written: *written,
            },
            Error::ShortRead { expected, read } => Error::ShortRead {
                expected: *expected,
                read: *read,
            },
            Error::ProtocolMisuse(msg) => Error::ProtocolMisuse(msg.clone()),
            Error::CorruptData(msg) => Error::CorruptData(msg.clone()),
            Error::Schema(msg) => Error::Schema(msg.clone()),
        }
    }
}
