use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt::{Display, Formatter};
use tasklist_core::SyncError;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    NotFound(String),
    BadRequest(String, String),
    InternalServerError(String),
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn bad_request(message: impl Into<String>, meta: Option<String>) -> Self {
        Self::BadRequest(message.into(), meta.unwrap_or_default())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalServerError(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(..) => StatusCode::BAD_REQUEST,
            ApiError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::NotFound(message) => write!(f, "Status=404, NotFound: {}", message),
            ApiError::BadRequest(message, meta) => {
                write!(f, "Status=400, BadRequest: {}. {}", message, meta)
            }
            ApiError::InternalServerError(message) => {
                write!(f, "Status=500, InternalServerError: {}", message)
            }
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::NotFound(id) => ApiError::not_found(format!("Task {} not found", id)),
            SyncError::InvalidTask(reason) => ApiError::bad_request("Invalid task", Some(reason)),
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(serde::Serialize)]
        struct ErrorResponse {
            message: String,
        }

        warn!("{}", self);
        let status = self.status();
        let message = match self {
            ApiError::NotFound(message)
            | ApiError::BadRequest(message, _)
            | ApiError::InternalServerError(message) => message,
        };

        (status, axum::Json(ErrorResponse { message })).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
