//! Error taxonomy for the model lifecycle core
//!
//! Every operation in the core is total: it returns either a typed result or
//! one of these variants. The HTTP layer maps each kind to a distinct status
//! code so callers can tell "download failed" from "load failed" from
//! "generation failed".

use crate::models::ArtifactStatus;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

/// Core error kinds
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model '{0}' not found")]
    ModelNotFound(String),

    #[error("model '{name}' is not ready: {status}")]
    NotReady {
        name: String,
        status: ArtifactStatus,
    },

    #[error("no artifact found in repository '{0}'")]
    NoArtifactFound(String),

    #[error("fetch failed for '{name}': {reason}")]
    Fetch { name: String, reason: String },

    #[error("artifact missing at {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("failed to load model at {}: {reason}", .path.display())]
    Load { path: PathBuf, reason: String },

    #[error("model at {} is not loaded", .0.display())]
    NotLoaded(PathBuf),

    #[error("generation failed: {0}")]
    Runtime(String),

    #[error("registry persistence failed: {0}")]
    Persist(#[source] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LlmError {
    /// HTTP status code for this error kind
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ModelNotFound(_) | Self::NoArtifactFound(_) | Self::NotLoaded(_) => {
                StatusCode::NOT_FOUND
            }
            Self::NotReady { .. } => StatusCode::CONFLICT,
            Self::Fetch { .. } => StatusCode::BAD_GATEWAY,
            Self::ArtifactMissing(_) => StatusCode::GONE,
            Self::Load { .. } | Self::Runtime(_) | Self::Persist(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for LlmError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Internal error");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            timestamp: chrono::Utc::now(),
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            LlmError::ModelNotFound("m".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            LlmError::NotReady {
                name: "m".into(),
                status: ArtifactStatus::Corrupted
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            LlmError::Fetch {
                name: "m".into(),
                reason: "timeout".into()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            LlmError::Runtime("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_not_ready_message_carries_status() {
        let err = LlmError::NotReady {
            name: "qwen".into(),
            status: ArtifactStatus::Incomplete,
        };
        let msg = err.to_string();
        assert!(msg.contains("qwen"));
        assert!(msg.contains("incomplete"));
    }
}
