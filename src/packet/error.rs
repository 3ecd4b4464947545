use std::{fmt, io};

/// Errors produced while decoding or encoding an mDNS message.
///
/// Decode errors are contained inside the engine: a bad record is skipped, a
/// bad message is dropped, and neither ever reaches the browsing caller.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum DecodeError {
    /// The end of the message was reached while more data was expected.
    Eof,
    /// The message exceeds the 9000-byte mDNS allowance.
    Oversized,
    /// A compression pointer pointed at itself or forward into the message.
    PointerLoop,
    /// A field held a value that is reserved or illegal.
    InvalidValue,
    /// An empty label was encountered inside a name.
    EmptyLabel,
    /// A label exceeded 63 bytes.
    LabelTooLong,
    /// Returned by the encoder when the output buffer is too small for the
    /// whole message.
    Truncated,
}

impl DecodeError {
    fn description(&self) -> &str {
        match self {
            DecodeError::Eof => "unexpected end of message",
            DecodeError::Oversized => "message exceeds maximum mDNS size",
            DecodeError::PointerLoop => "compression pointer loop",
            DecodeError::InvalidValue => "invalid field value",
            DecodeError::EmptyLabel => "empty label in domain name",
            DecodeError::LabelTooLong => "label exceeds 63 bytes",
            DecodeError::Truncated => "message truncated",
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl std::error::Error for DecodeError {}

impl From<DecodeError> for io::Error {
    fn from(e: DecodeError) -> io::Error {
        match e {
            DecodeError::Eof => io::ErrorKind::UnexpectedEof.into(),
            DecodeError::Truncated => io::ErrorKind::OutOfMemory.into(),
            DecodeError::PointerLoop => io::Error::new(
                io::ErrorKind::InvalidData,
                "compression pointer loop; possibly a malicious message",
            ),
            _ => io::Error::new(io::ErrorKind::InvalidData, e.description()),
        }
    }
}
