//! Application state.

use std::sync::Arc;

use xpex_export::{ExportRegistry, ExportSettings, Exporter};
use xpex_milestone::{build_http_client, AuthBroker, ConfigClient, MilestoneResult};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub milestone: Arc<ConfigClient>,
    pub exporter: Exporter,
}

impl AppState {
    /// Create new application state.
    pub fn new(config: ApiConfig) -> MilestoneResult<Self> {
        let http = build_http_client(config.tls_verify)?;

        let auth = Arc::new(AuthBroker::new(
            http.clone(),
            config.milestone_server_url.clone(),
            config.milestone_username.clone(),
            config.milestone_password.clone(),
        ));
        let milestone = Arc::new(ConfigClient::new(
            http,
            config.milestone_server_url.clone(),
            Arc::clone(&auth),
        ));

        let settings = ExportSettings {
            export_dir: config.export_dir.clone(),
            pipeline_depth: config.pipeline_depth,
            io_timeout: config.io_timeout,
            jpeg_framerate: config.encoder_framerate,
            max_concurrent: config.max_concurrent_exports,
            ..ExportSettings::default()
        };
        let exporter = Exporter::new(
            auth,
            Arc::clone(&milestone),
            ExportRegistry::new(),
            settings,
        );

        Ok(Self {
            config,
            milestone,
            exporter,
        })
    }
}
