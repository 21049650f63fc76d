//! Export job records and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::{CameraId, TimeRange};

/// Unique identifier for an export job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExportId(pub String);

impl ExportId {
    /// Generate a new random export ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExportId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Export job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportState {
    /// Job is registered but the worker has not started yet
    #[default]
    Queued,
    /// Worker is streaming frames into the encoder
    Running,
    /// MP4 is on disk and downloadable
    Succeeded,
    /// Job ended without a usable output
    Failed,
}

impl ExportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportState::Queued => "queued",
            ExportState::Running => "running",
            ExportState::Succeeded => "succeeded",
            ExportState::Failed => "failed",
        }
    }

    /// Terminal states are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportState::Succeeded | ExportState::Failed)
    }
}

/// A single export job.
///
/// Created by the exporter facade and mutated only by the one worker task
/// driving the job. The registry holding these records is in-memory only:
/// a process restart loses all jobs and invalidates download URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    /// Unique export ID
    pub id: ExportId,

    /// Source camera
    pub camera_id: CameraId,

    /// Requested time range
    pub range: TimeRange,

    /// Job state
    #[serde(default)]
    pub state: ExportState,

    /// Progress in `[0, 1]`, monotone non-decreasing
    #[serde(default)]
    pub progress: f32,

    /// Frames handed to the encoder so far
    #[serde(default)]
    pub frames_written: u64,

    /// Final MP4 path once succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,

    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Stable error tag (if failed), e.g. `codec_unsupported`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_tag: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Started at timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Completed at timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExportJob {
    /// Create a new queued job.
    pub fn new(camera_id: CameraId, range: TimeRange) -> Self {
        let now = Utc::now();
        Self {
            id: ExportId::new(),
            camera_id,
            range,
            state: ExportState::Queued,
            progress: 0.0,
            frames_written: 0,
            output_path: None,
            error: None,
            error_tag: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Start the job.
    pub fn start(mut self) -> Self {
        self.state = ExportState::Running;
        self.started_at = Some(Utc::now());
        self.updated_at = Utc::now();
        self
    }

    /// Mark the job as succeeded with its final output path.
    pub fn complete(mut self, output_path: PathBuf) -> Self {
        self.state = ExportState::Succeeded;
        self.output_path = Some(output_path);
        self.progress = 1.0;
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
        self
    }

    /// Mark the job as failed with a stable tag and a message.
    pub fn fail(mut self, tag: impl Into<String>, error: impl Into<String>) -> Self {
        self.state = ExportState::Failed;
        self.error_tag = Some(tag.into());
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
        self
    }

    /// Update progress; never moves backwards.
    pub fn with_progress(mut self, progress: f32, frames_written: u64) -> Self {
        self.progress = self.progress.max(progress.clamp(0.0, 1.0));
        self.frames_written = frames_written;
        self.updated_at = Utc::now();
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
