//! Export error taxonomy.

use thiserror::Error;

use xpex_imageserver::ProtoError;
use xpex_media::EncoderError;
use xpex_milestone::MilestoneError;

pub type ExportResult<T> = Result<T, ExportError>;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Requested range of {requested_ms} ms exceeds the {max_ms} ms limit")]
    RangeTooLarge { requested_ms: i64, max_ms: i64 },

    #[error("No recording in the requested range")]
    NoRecordingInRange,

    #[error("Export cancelled")]
    Cancelled,

    #[error("Milestone error: {0}")]
    Milestone(#[from] MilestoneError),

    #[error("Protocol error: {0}")]
    Proto(#[from] ProtoError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExportError {
    /// Stable tag for HTTP bodies and failed-job records.
    pub fn tag(&self) -> &'static str {
        match self {
            ExportError::RangeTooLarge { .. } => "range_too_large",
            ExportError::NoRecordingInRange => "no_recording_in_range",
            ExportError::Cancelled => "cancelled",
            ExportError::Milestone(e) => milestone_tag(e),
            ExportError::Proto(e) => match e {
                ProtoError::BadHeader(_) => "proto_bad_header",
                ProtoError::ShortRead { .. } => "proto_short_read",
                ProtoError::ContentLengthMismatch { .. } => "proto_content_length_mismatch",
                ProtoError::MissingTrailer => "proto_missing_trailer",
                ProtoError::UnexpectedStatus(_) => "proto_unexpected_status",
                ProtoError::UnsupportedCodec(_) => "codec_unsupported",
                ProtoError::Timeout => "proto_timeout",
                ProtoError::ConnectionBroken => "proto_connection_broken",
                ProtoError::Io(_) => "proto_io",
            },
            ExportError::Encoder(e) => match e {
                EncoderError::FfmpegNotFound => "encoder_not_found",
                EncoderError::SpawnFailed(_) => "encoder_spawn_failed",
                EncoderError::NonZeroExit { .. } => "encoder_failed",
                EncoderError::Io(_) => "encoder_io",
            },
            ExportError::Io(_) => "io",
        }
    }
}

/// Stable tag for Milestone client errors, shared with the HTTP layer.
pub fn milestone_tag(e: &MilestoneError) -> &'static str {
    match e {
        MilestoneError::InvalidCredentials => "auth_invalid_credentials",
        MilestoneError::SoapLoginFailed(_) => "auth_soap_login_failed",
        MilestoneError::TokenExpired => "auth_expired",
        MilestoneError::CameraNotFound(_) => "camera_not_found",
        MilestoneError::RecorderUnreachable(_) => "recorder_unreachable",
        MilestoneError::Http(_) => "milestone_unreachable",
        MilestoneError::UnexpectedResponse(_) => "milestone_unexpected_response",
    }
}
