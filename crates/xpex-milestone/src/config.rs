//! Configuration REST client: camera list and recording-server resolution.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use xpex_models::{Camera, CameraId};

use crate::auth::AuthBroker;
use crate::error::{MilestoneError, MilestoneResult};

/// Default ImageServer port when the configuration payload carries none.
pub const DEFAULT_IMAGESERVER_PORT: u16 = 7563;

#[derive(Debug, Deserialize)]
struct ArrayResponse<T> {
    #[serde(default = "Vec::new")]
    array: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CameraEntry {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordingServerEntry {
    id: String,
    #[serde(default)]
    host_name: Option<String>,
    #[serde(default)]
    port_number: Option<u16>,
    #[serde(default)]
    relations: Option<Relations>,
}

#[derive(Debug, Deserialize)]
struct Relations {
    #[serde(default = "Vec::new")]
    children: Vec<Relation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Relation {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    id: String,
}

/// Thin REST caller against `/api/rest/v1`.
pub struct ConfigClient {
    http: reqwest::Client,
    base_url: String,
    auth: Arc<AuthBroker>,
    /// Resolve recorders to the management server's hostname rather than
    /// their own. On by default: the recorder's internal name is often not
    /// routable from where this service runs (VPN/overlay networks), while
    /// the management host demonstrably is.
    prefer_management_host: bool,
}

impl ConfigClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, auth: Arc<AuthBroker>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            prefer_management_host: true,
        }
    }

    /// Pass `false` to use each recording server's own hostname instead of
    /// the management server's.
    pub fn with_management_host(mut self, prefer: bool) -> Self {
        self.prefer_management_host = prefer;
        self
    }

    /// List all configured cameras.
    pub async fn list_cameras(&self) -> MilestoneResult<Vec<Camera>> {
        let url = format!("{}/api/rest/v1/cameras", self.base_url);
        let body: ArrayResponse<CameraEntry> = self.get_json(&url).await?;

        let cameras = body
            .array
            .into_iter()
            .map(|entry| {
                let display_name = entry
                    .display_name
                    .or(entry.name)
                    .unwrap_or_else(|| entry.id.clone());
                Camera {
                    id: CameraId::from_string(entry.id),
                    display_name,
                    enabled: entry.enabled,
                    recording_server_host: None,
                    recording_server_port: None,
                }
            })
            .collect();
        Ok(cameras)
    }

    /// Resolve the recording server serving `camera_id`.
    ///
    /// Lists recording servers and picks the one whose child relations
    /// contain the camera. When the payload carries no relations at all and
    /// exactly one recording server exists, that server is used.
    pub async fn resolve_recorder(&self, camera_id: &CameraId) -> MilestoneResult<(String, u16)> {
        let url = format!("{}/api/rest/v1/recordingServers", self.base_url);
        let body: ArrayResponse<RecordingServerEntry> = self.get_json(&url).await?;

        if body.array.is_empty() {
            return Err(MilestoneError::RecorderUnreachable(
                "no recording servers configured".to_string(),
            ));
        }

        let has_relations = body.array.iter().any(|s| s.relations.is_some());
        let server = if has_relations {
            body.array
                .iter()
                .find(|server| {
                    server
                        .relations
                        .as_ref()
                        .map(|r| {
                            r.children
                                .iter()
                                .any(|c| c.kind == "cameras" && c.id == camera_id.as_str())
                        })
                        .unwrap_or(false)
                })
                .ok_or_else(|| MilestoneError::CameraNotFound(camera_id.to_string()))?
        } else {
            if body.array.len() > 1 {
                warn!(
                    camera_id = %camera_id,
                    servers = body.array.len(),
                    "Recording servers carry no relations, using the first"
                );
            }
            &body.array[0]
        };

        // Prefer the management server's host; the recorder's own hostName
        // is the fallback when the base URL carries no parsable host
        let own_host = || {
            server.host_name.clone().ok_or_else(|| {
                MilestoneError::RecorderUnreachable(format!(
                    "recording server {} has no hostname",
                    server.id
                ))
            })
        };
        let host = if self.prefer_management_host {
            match self.management_host() {
                Ok(host) => host,
                Err(_) => own_host()?,
            }
        } else {
            own_host()?
        };

        let port = server.port_number.unwrap_or(DEFAULT_IMAGESERVER_PORT);
        debug!(camera_id = %camera_id, host = %host, port, "Resolved recording server");
        Ok((host, port))
    }

    fn management_host(&self) -> MilestoneResult<String> {
        reqwest::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .ok_or_else(|| {
                MilestoneError::unexpected(format!("unparsable base URL: {}", self.base_url))
            })
    }

    /// GET with the OAuth bearer, retrying once after a 401 with fresh
    /// tokens.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> MilestoneResult<T> {
        for attempt in 0..2 {
            let token = self.auth.oauth_token().await?;
            let response = self.http.get(url).bearer_auth(&token).send().await?;

            if response.status() == reqwest::StatusCode::UNAUTHORIZED && attempt == 0 {
                debug!(url = %url, "Bearer rejected, refreshing OAuth token");
                self.auth.invalidate().await;
                continue;
            }

            if response.status() == reqwest::StatusCode::UNAUTHORIZED {
                return Err(MilestoneError::TokenExpired);
            }
            if !response.status().is_success() {
                return Err(MilestoneError::unexpected(format!(
                    "{} returned {}",
                    url,
                    response.status()
                )));
            }
            return Ok(response.json().await?);
        }
        unreachable!("both attempts return")
    }
}
