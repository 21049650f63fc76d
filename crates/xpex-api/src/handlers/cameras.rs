//! Camera listing handler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::info;

use crate::error::ApiResult;
use crate::state::AppState;

/// Camera summary returned to the browser UI.
#[derive(Debug, Serialize)]
pub struct CameraResponse {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct CameraListResponse {
    pub cameras: Vec<CameraResponse>,
}

/// GET /api/cameras
///
/// Proxies the Milestone configuration API's camera list.
pub async fn list_cameras(State(state): State<AppState>) -> ApiResult<Json<CameraListResponse>> {
    let cameras = state.milestone.list_cameras().await?;
    info!(count = cameras.len(), "Listed cameras");

    let cameras = cameras
        .into_iter()
        .map(|camera| CameraResponse {
            id: camera.id.to_string(),
            name: camera.display_name.clone(),
            display_name: camera.display_name,
            enabled: camera.enabled,
        })
        .collect();

    Ok(Json(CameraListResponse { cameras }))
}
