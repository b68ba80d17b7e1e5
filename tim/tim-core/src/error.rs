//! Error types shared by every layer of the service.

use thiserror::Error;

use crate::plugin::PluginError;

pub type Result<T> = std::result::Result<T, TimError>;

#[derive(Error, Debug)]
pub enum TimError {
    /// The current user lacks the required access.
    #[error("{0}")]
    AccessDenied(String),

    #[error("{0}")]
    NotFound(String),

    /// Malformed input or a failed domain check.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    ItemExists(String),

    /// A uniqueness rule would be broken by the operation.
    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TimError {
    pub fn access_denied(msg: impl Into<String>) -> Self {
        TimError::AccessDenied(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        TimError::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        TimError::Validation(msg.into())
    }
}
