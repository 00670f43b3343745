//! Error types for the control surface.

use crate::registry::RegistryError;
use thiserror::Error;

/// Errors from parsing or executing a control request.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The request line is not a valid request.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] serde_json::Error),

    /// The request line is not valid UTF-8.
    #[error("invalid request: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// Unknown `encoding` value.
    #[error("unsupported encoding \"{0}\"")]
    UnsupportedEncoding(String),

    /// `data` is not valid base64.
    #[error("invalid base64 data: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// Offsets are logical positions and cannot be negative.
    #[error("offset must not be negative (got {0})")]
    NegativeOffset(i64),

    /// The registry rejected the operation.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Result type for control operations.
pub type ControlResult<T> = Result<T, ControlError>;
