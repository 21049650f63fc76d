//! Export creation, polling, download, and cancellation handlers.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::info;

use xpex_models::{CameraId, ExportId, ExportJob, TimeRange};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// POST /api/export request body. Timestamps are RFC 3339.
#[derive(Debug, Deserialize)]
pub struct CreateExportRequest {
    pub camera_id: String,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Serialize)]
pub struct CreateExportResponse {
    pub export_id: String,
}

/// POST /api/export
///
/// Validates the range (at most 10 minutes) and queues the export.
/// Returns immediately; progress is polled via GET /api/export/:id.
pub async fn create_export(
    State(state): State<AppState>,
    Json(request): Json<CreateExportRequest>,
) -> ApiResult<Json<CreateExportResponse>> {
    let range = TimeRange::from_rfc3339(&request.start_time, &request.end_time)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let camera_id = CameraId::from_string(request.camera_id);
    let export_id = state.exporter.start(camera_id.clone(), range).await?;

    info!(export_id = %export_id, camera_id = %camera_id, "Export requested");
    Ok(Json(CreateExportResponse {
        export_id: export_id.to_string(),
    }))
}

/// GET /api/export/:id
///
/// Snapshot of the job record.
pub async fn get_export(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExportJob>> {
    let id = ExportId::from_string(id);
    let job = state
        .exporter
        .status(&id)
        .await
        .ok_or_else(|| ApiError::not_found("Export not found"))?;
    Ok(Json(job))
}

/// DELETE /api/export/:id
///
/// Best-effort cancellation of a running export.
pub async fn cancel_export(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = ExportId::from_string(id);
    if state.exporter.status(&id).await.is_none() {
        return Err(ApiError::not_found("Export not found"));
    }
    state.exporter.cancel(&id).await;
    Ok(StatusCode::ACCEPTED)
}

/// GET /api/export/:id/download
///
/// Streams the finished MP4; 404 until the job has succeeded.
pub async fn download_export(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = ExportId::from_string(id);
    if state.exporter.status(&id).await.is_none() {
        return Err(ApiError::not_found("Export not found"));
    }

    let path = state
        .exporter
        .output_path(&id)
        .await
        .ok_or_else(|| ApiError::not_found("Export not ready"))?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to open {}: {}", path.display(), e)))?;
    let size = file
        .metadata()
        .await
        .map(|m| m.len())
        .map_err(|e| ApiError::internal(e.to_string()))?;

    let body = Body::from_stream(ReaderStream::new(file));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CONTENT_LENGTH, size)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{id}.mp4\""),
        )
        .body(body)
        .map_err(|e| ApiError::internal(e.to_string()))
}
