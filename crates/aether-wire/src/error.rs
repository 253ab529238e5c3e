//! Wire decoding errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    /// The buffer ended before the value did.
    #[error("unexpected end of input at byte {0}")]
    Eof(usize),
    /// Handshake did not start with the protocol magic.
    #[error("bad protocol magic")]
    BadMagic,
    /// Unknown mode byte in the handshake.
    #[error("unknown mode byte {0:#04x}")]
    BadMode(u8),
    /// Unknown tag byte for the named kind of value.
    #[error("unknown {kind} tag {tag:#04x}")]
    BadTag { kind: &'static str, tag: u8 },
    /// A declared length exceeds the remaining input.
    #[error("length {len} overruns input at byte {at}")]
    BadLength { at: usize, len: usize },
    #[error("invalid utf-8 in string payload")]
    BadUtf8(#[from] std::string::FromUtf8Error),
    /// Bytes left over after a complete token.
    #[error("{0} trailing bytes after token")]
    Trailing(usize),
}

pub type Result<T> = std::result::Result<T, WireError>;
