//! Protocol error types.

use thiserror::Error;

pub type ProtoResult<T> = Result<T, ProtoError>;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Malformed frame header: {0}")]
    BadHeader(String),

    #[error("Short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("Content length mismatch: declared {declared}, actual {actual}")]
    ContentLengthMismatch { declared: usize, actual: usize },

    #[error("Missing \\r\\n\\r\\n trailer after payload")]
    MissingTrailer,

    #[error("Unexpected response: {0}")]
    UnexpectedStatus(String),

    #[error("Unsupported codec id {0:#06x}")]
    UnsupportedCodec(u16),

    #[error("Read timed out")]
    Timeout,

    #[error("Connection is broken")]
    ConnectionBroken,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtoError {
    pub fn bad_header(msg: impl Into<String>) -> Self {
        Self::BadHeader(msg.into())
    }

    pub fn unexpected_status(msg: impl Into<String>) -> Self {
        Self::UnexpectedStatus(msg.into())
    }

    /// Whether the error leaves the connection unusable.
    ///
    /// Everything here breaks framing: after any of these the byte stream
    /// position is unknown and further reads would return garbage.
    pub fn breaks_connection(&self) -> bool {
        !matches!(self, ProtoError::UnsupportedCodec(_))
    }
}
