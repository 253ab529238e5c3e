//! Error types for the value algebra.

use thiserror::Error;

/// Error produced while parsing canonical text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Unexpected character at the given byte offset.
    #[error("unexpected character {found:?} at offset {at}")]
    Unexpected { at: usize, found: char },
    /// Input ended before the value was complete.
    #[error("unexpected end of input")]
    Eof,
    /// A dimension key was malformed.
    #[error("bad dimension at offset {at}: {reason}")]
    BadDimension { at: usize, reason: &'static str },
    /// A base value literal was malformed.
    #[error("bad value literal at offset {at}: {reason}")]
    BadLiteral { at: usize, reason: &'static str },
    /// Trailing input remained after a complete value.
    #[error("trailing input at offset {at}")]
    Trailing { at: usize },
}

pub type Result<T> = std::result::Result<T, ParseError>;
