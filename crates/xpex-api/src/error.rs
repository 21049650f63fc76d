//! API error types and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use xpex_export::ExportError;
use xpex_milestone::MilestoneError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Milestone error: {0}")]
    Milestone(#[from] MilestoneError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Export(e) => export_status(e),
            ApiError::Milestone(e) => milestone_status(e),
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable tag carried in the body.
    fn tag(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::Export(e) => e.tag(),
            ApiError::Milestone(e) => xpex_export::milestone_tag(e),
            ApiError::Internal(_) => "internal",
        }
    }
}

fn export_status(e: &ExportError) -> StatusCode {
    match e {
        ExportError::RangeTooLarge { .. } | ExportError::NoRecordingInRange => {
            StatusCode::BAD_REQUEST
        }
        ExportError::Milestone(m) => milestone_status(m),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn milestone_status(e: &MilestoneError) -> StatusCode {
    match e {
        MilestoneError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        MilestoneError::SoapLoginFailed(_) | MilestoneError::TokenExpired => StatusCode::FORBIDDEN,
        MilestoneError::CameraNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    tag: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            detail: self.to_string(),
            tag: self.tag().to_string(),
        };
        (status, Json(body)).into_response()
    }
}
