//! Frames returned by the ImageServer protocol and their codec classification.

use serde::{Deserialize, Serialize};

/// Content type the ImageServer uses for raw (non-JPEG) codec payloads.
pub const GENERIC_BYTEDATA_CONTENT_TYPE: &str = "application/x-genericbytedata-octet-stream";

/// Codec id for raw H.264 Annex-B payloads inside a generic bytedata frame.
pub const CODEC_ID_H264: u16 = 0x000A;

/// Timestamp value meaning "no neighboring frame" (start or end of the
/// recorded range).
pub const NO_NEIGHBOR_TS: i64 = -1;

/// A single frame received from the ImageServer.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Request id this frame answers
    pub request_id: u32,

    /// Declared content type (`image/jpeg` or generic bytedata)
    pub content_type: String,

    /// Declared payload length in bytes
    pub content_length: u32,

    /// Frame timestamp, Unix milliseconds
    pub current_ts_ms: i64,

    /// Previous recorded frame timestamp, or [`NO_NEIGHBOR_TS`]
    pub prev_ts_ms: i64,

    /// Next recorded frame timestamp, or [`NO_NEIGHBOR_TS`]
    pub next_ts_ms: i64,

    /// Raw payload bytes (still carrying the proprietary header for
    /// generic bytedata frames)
    pub payload: Vec<u8>,
}

impl Frame {
    /// Whether this is the last recorded frame.
    pub fn is_last(&self) -> bool {
        self.next_ts_ms == NO_NEIGHBOR_TS
    }
}

/// Codec classification derived once from the first frame of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    /// Standard JPEG frames, muxed via an image sequence
    Jpeg,
    /// Raw H.264 Annex-B, muxed without re-encoding
    RawH264,
    /// Any other proprietary codec id; the export fails
    Unsupported(u16),
}

impl CodecKind {
    /// Classify a frame from its declared content type and payload bytes.
    ///
    /// Generic bytedata frames carry a big-endian codec id in their first
    /// two bytes. JPEG is recognized by content type or by the `FF D8 FF`
    /// magic, which also covers servers that ignore `alwaysstdjpeg=no`.
    pub fn classify(content_type: &str, payload: &[u8]) -> Self {
        if content_type == GENERIC_BYTEDATA_CONTENT_TYPE {
            let codec_id = match payload {
                [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
                _ => 0,
            };
            return if codec_id == CODEC_ID_H264 {
                CodecKind::RawH264
            } else {
                CodecKind::Unsupported(codec_id)
            };
        }

        if content_type.eq_ignore_ascii_case("image/jpeg") || payload.starts_with(&[0xFF, 0xD8, 0xFF])
        {
            return CodecKind::Jpeg;
        }

        CodecKind::Unsupported(0)
    }

    /// Whether the export can proceed with this codec.
    pub fn is_supported(&self) -> bool {
        !matches!(self, CodecKind::Unsupported(_))
    }
}
