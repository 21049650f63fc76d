//! Shared data models for the XProtect export backend.
//!
//! This crate provides Serde-serializable types for:
//! - Cameras and their recording-server placement
//! - Frames returned by the ImageServer protocol
//! - Codec classification of the first frame
//! - Export jobs and their lifecycle
//! - Export time ranges

pub mod camera;
pub mod export;
pub mod frame;
pub mod time;

// Re-export common types
pub use camera::{Camera, CameraId};
pub use export::{ExportId, ExportJob, ExportState};
pub use frame::{CodecKind, Frame, CODEC_ID_H264, GENERIC_BYTEDATA_CONTENT_TYPE, NO_NEIGHBOR_TS};
pub use time::{TimeRange, TimeRangeError, MAX_EXPORT_RANGE_MS};
