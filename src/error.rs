//! Error types for btrie building, reading and exact matching

use thiserror::Error;

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by this crate.
///
/// A lookup that finds nothing is `Ok(None)`; errors are reserved for
/// malformed files, inputs that cannot be encoded, and IO failures.
#[derive(Error, Debug)]
pub enum Error {
    /// File does not start with the btrie magic
    #[error("invalid magic: {0:?}")]
    InvalidMagic([u8; 4]),

    /// File was written with an unknown format version
    #[error("unsupported btrie version: {0}")]
    UnsupportedVersion(u16),

    /// Structural damage found while traversing a file
    #[error("btrie file is corrupt at offset {offset}: {reason}")]
    Corrupt { offset: usize, reason: &'static str },

    /// Token does not fit in a 1-byte key length
    #[error("token of {0} bytes exceeds the 255 byte limit")]
    TokenTooLong(usize),

    /// Value does not fit in a 2-byte data length
    #[error("value of {0} bytes exceeds the 65535 byte limit")]
    ValueTooLong(usize),

    /// Sibling block does not fit in a 2-byte block length
    #[error("children block of {0} bytes exceeds the 65535 byte limit")]
    BlockTooLarge(usize),

    /// Offsets would not fit in 4 bytes
    #[error("btrie of {0} bytes exceeds the 4 GiB offset range")]
    FileTooLarge(usize),

    /// Quoted span in the target code has no match in the utterance
    #[error("quoted span {span:?} does not occur in the utterance")]
    SpanNotFound { span: String },

    /// Target code opens a quoted span and never closes it
    #[error("unterminated quoted span in target code")]
    UnterminatedSpan,

    /// Target code of an example does not fit in a 2-byte data length
    #[error("target code of {0} bytes exceeds the 65535 byte limit")]
    CodeTooLong(usize),

    /// Example provider has no row for this id
    #[error("example not found: {0}")]
    ExampleNotFound(i64),

    /// Dataset line could not be parsed
    #[error("malformed dataset line {line}: {reason}")]
    MalformedDataset { line: usize, reason: String },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error means the btrie file itself is not well formed.
    ///
    /// Format errors are never retryable.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidMagic(_) | Error::UnsupportedVersion(_) | Error::Corrupt { .. }
        )
    }

    /// Whether this error rejects a single example rather than the whole run.
    pub fn is_example_error(&self) -> bool {
        matches!(
            self,
            Error::SpanNotFound { .. }
                | Error::UnterminatedSpan
                | Error::TokenTooLong(_)
                | Error::CodeTooLong(_)
        )
    }
}
