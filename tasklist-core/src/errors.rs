use crate::models::TaskId;
use crate::protocol::ErrorCode;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Task {0} already exists")]
    DuplicateId(TaskId),

    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

impl SyncError {
    /// True for failures to reach or be accepted by the remote service.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(self, SyncError::Client(_))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationError(err.to_string())
    }
}

impl From<chrono::ParseError> for SyncError {
    fn from(err: chrono::ParseError) -> Self {
        SyncError::SerializationError(err.to_string())
    }
}

impl From<strum::ParseError> for SyncError {
    fn from(err: strum::ParseError) -> Self {
        SyncError::SerializationError(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Remote rejected request ({code:?}): {reason}")]
    Rejected { code: ErrorCode, reason: String },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to acquire lock: {0}")]
    LockError(String),

    #[error("Thread safety violation: process_events() must be called on the registration thread")]
    ThreadSafetyViolation,

    #[error("No callbacks registered yet")]
    NoCallbacksRegistered,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Server sync error: {0}")]
    ServerSync(String),
}
