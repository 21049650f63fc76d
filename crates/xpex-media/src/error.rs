//! Encoder error types.

use thiserror::Error;

pub type EncoderResult<T> = Result<T, EncoderError>;

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("Encoder spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Encoder exited with status {code:?}: {stderr_tail}")]
    NonZeroExit {
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EncoderError {
    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::SpawnFailed(msg.into())
    }
}
