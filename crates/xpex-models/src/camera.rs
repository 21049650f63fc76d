//! Camera descriptors resolved from the Milestone configuration API.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a camera (a Milestone GUID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub String);

impl CameraId {
    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CameraId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A camera with its recording-server placement.
///
/// Produced by the configuration client; consumed read-only by the exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    /// Camera GUID
    pub id: CameraId,

    /// Human-readable name
    pub display_name: String,

    /// Whether the camera is enabled in the VMS configuration
    pub enabled: bool,

    /// Recording server hostname serving this camera's media
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_server_host: Option<String>,

    /// ImageServer port on the recording server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_server_port: Option<u16>,
}
