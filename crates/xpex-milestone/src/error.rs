//! Milestone client error types.

use thiserror::Error;

pub type MilestoneResult<T> = Result<T, MilestoneError>;

#[derive(Debug, Error)]
pub enum MilestoneError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("SOAP login failed: {0}")]
    SoapLoginFailed(String),

    #[error("OAuth token rejected after refresh")]
    TokenExpired,

    #[error("Camera not found: {0}")]
    CameraNotFound(String),

    #[error("Recording server unreachable: {0}")]
    RecorderUnreachable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl MilestoneError {
    pub fn soap_login_failed(msg: impl Into<String>) -> Self {
        Self::SoapLoginFailed(msg.into())
    }

    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::UnexpectedResponse(msg.into())
    }
}
