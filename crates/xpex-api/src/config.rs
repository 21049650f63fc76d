//! API configuration from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Server and Milestone connection configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Milestone management server base URL
    pub milestone_server_url: String,
    /// Milestone basic user name
    pub milestone_username: String,
    /// Milestone basic user password
    pub milestone_password: String,
    /// Verify TLS certificates on Milestone endpoints
    pub tls_verify: bool,
    /// In-flight request window on the ImageServer connection
    pub pipeline_depth: usize,
    /// Directory receiving finished MP4 files
    pub export_dir: PathBuf,
    /// Concurrently running export workers
    pub max_concurrent_exports: usize,
    /// Nominal framerate for the JPEG fallback mux
    pub encoder_framerate: u32,
    /// Connect/read timeout on the ImageServer socket
    pub io_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            milestone_server_url: String::new(),
            milestone_username: String::new(),
            milestone_password: String::new(),
            tls_verify: true,
            pipeline_depth: 8,
            export_dir: PathBuf::from("./exports"),
            max_concurrent_exports: 4,
            encoder_framerate: 15,
            io_timeout: Duration::from_secs(30),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8000),
            milestone_server_url: std::env::var("MILESTONE_SERVER_URL").unwrap_or_default(),
            milestone_username: std::env::var("MILESTONE_USERNAME").unwrap_or_default(),
            milestone_password: std::env::var("MILESTONE_PASSWORD").unwrap_or_default(),
            tls_verify: std::env::var("TLS_VERIFY")
                .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
            pipeline_depth: std::env::var("PIPELINE_DEPTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8),
            export_dir: std::env::var("EXPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./exports")),
            max_concurrent_exports: std::env::var("MAX_CONCURRENT_EXPORTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4),
            encoder_framerate: std::env::var("ENCODER_FRAMERATE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(15),
            io_timeout: Duration::from_secs(
                std::env::var("IO_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }
}
