use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::dicom::DicomError;
use common::storage::StorageError;
use sea_orm::DbErr;
use serde::Serialize;

use crate::volumes::VolumeError;

/// Structured error response body.
#[derive(Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// Application-level error type.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    BadFrameList(String),
    FrameOutOfRange(String),
    TenantNotFound(String),
    NotFound(String),
    Conflict(String),
    InvalidDicom(String),
    NoWriteVolume(String),
    StorageUnavailable(String),
    DiskLow,
    Internal(String),
}

impl AppError {
    fn status_and_body(self) -> (StatusCode, ErrorBody) {
        match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "VALIDATION_ERROR",
                    message: msg,
                },
            ),
            AppError::BadFrameList(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "BAD_FRAME_LIST",
                    message: msg,
                },
            ),
            AppError::FrameOutOfRange(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "FRAME_OUT_OF_RANGE",
                    message: msg,
                },
            ),
            AppError::TenantNotFound(code) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    code: "TENANT_NOT_FOUND",
                    message: format!("Unknown or inactive tenant '{code}'"),
                },
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    code: "NOT_FOUND",
                    message: msg,
                },
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                ErrorBody {
                    code: "CONFLICT",
                    message: msg,
                },
            ),
            AppError::InvalidDicom(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "INVALID_DICOM",
                    message: msg,
                },
            ),
            AppError::NoWriteVolume(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody {
                    code: "NO_WRITE_VOLUME",
                    message: msg,
                },
            ),
            AppError::StorageUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody {
                    code: "STORAGE_UNAVAILABLE",
                    message: msg,
                },
            ),
            AppError::DiskLow => (
                StatusCode::INSUFFICIENT_STORAGE,
                ErrorBody {
                    code: "DISK_LOW",
                    message: "Ingest is blocked until disk space is reclaimed".into(),
                },
            ),
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "INTERNAL_ERROR",
                        message: "An unexpected error occurred".into(),
                    },
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(path) => {
                tracing::warn!("Stored object missing: {path}");
                AppError::NotFound("Stored object not found".into())
            }
            other => AppError::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<DicomError> for AppError {
    fn from(err: DicomError) -> Self {
        match err {
            DicomError::FrameOutOfRange { .. } => AppError::FrameOutOfRange(err.to_string()),
            other => AppError::InvalidDicom(other.to_string()),
        }
    }
}

impl From<VolumeError> for AppError {
    fn from(err: VolumeError) -> Self {
        match err {
            VolumeError::NoWriteVolume(_) => AppError::NoWriteVolume(err.to_string()),
            VolumeError::UnknownVolume(_) => AppError::StorageUnavailable(err.to_string()),
            VolumeError::Db(e) => AppError::Internal(e),
            VolumeError::Provider(e) => AppError::StorageUnavailable(e.to_string()),
            VolumeError::Template(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<mq::MqError> for AppError {
    fn from(err: mq::MqError) -> Self {
        AppError::Internal(err.to_string())
    }
}
