//! Error types for the ecological index engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using EcoError.
pub type EcoResult<T> = Result<T, EcoError>;

/// Primary error type for index computation and task handling.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EcoError {
    // === Precondition Errors ===
    #[error("Missing required band: {0}")]
    MissingBand(String),

    #[error("Duplicate band role: {0}")]
    DuplicateBand(String),

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("Unsupported raster format: {0}")]
    UnsupportedFormat(String),

    #[error("Unknown index: {0}")]
    UnknownIndex(String),

    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    #[error("No indices requested")]
    EmptyRequest,

    #[error("Invalid task transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    // === Data Quality Errors ===
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    // === Resource Errors ===
    #[error("Failed to read raster: {0}")]
    RasterRead(String),

    #[error("Invalid raster data: {0}")]
    RasterDecode(String),

    #[error("Decompression failed: {0}")]
    Decompression(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Rendering failed: {0}")]
    RenderError(String),

    // === Infrastructure Errors ===
    #[error("Deadline exceeded: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Coarse classification recorded on failed tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Precondition,
    DataQuality,
    Resource,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Precondition => "precondition",
            ErrorKind::DataQuality => "data_quality",
            ErrorKind::Resource => "resource",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "precondition" => Some(ErrorKind::Precondition),
            "data_quality" => Some(ErrorKind::DataQuality),
            "resource" => Some(ErrorKind::Resource),
            "timeout" => Some(ErrorKind::Timeout),
            "internal" => Some(ErrorKind::Internal),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EcoError {
    /// Classify this error for task reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EcoError::MissingBand(_)
            | EcoError::DuplicateBand(_)
            | EcoError::ShapeMismatch { .. }
            | EcoError::UnsupportedFormat(_)
            | EcoError::UnknownIndex(_)
            | EcoError::InvalidParameter { .. }
            | EcoError::EmptyRequest
            | EcoError::InvalidTransition { .. }
            | EcoError::TaskNotFound(_) => ErrorKind::Precondition,

            EcoError::InsufficientData(_) => ErrorKind::DataQuality,

            EcoError::RasterRead(_)
            | EcoError::RasterDecode(_)
            | EcoError::Decompression(_)
            | EcoError::StorageError(_)
            | EcoError::DatabaseError(_)
            | EcoError::RenderError(_) => ErrorKind::Resource,

            EcoError::Timeout(_) => ErrorKind::Timeout,
            EcoError::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EcoError::RasterRead(_) | EcoError::StorageError(_) | EcoError::DatabaseError(_)
        )
    }

    pub fn invalid_parameter(param: impl Into<String>, message: impl Into<String>) -> Self {
        EcoError::InvalidParameter {
            param: param.into(),
            message: message.into(),
        }
    }

    pub fn shape_mismatch(expected: (usize, usize), actual: (usize, usize)) -> Self {
        EcoError::ShapeMismatch {
            expected: format!("{}x{}", expected.0, expected.1),
            actual: format!("{}x{}", actual.0, actual.1),
        }
    }
}

impl From<std::io::Error> for EcoError {
    fn from(err: std::io::Error) -> Self {
        EcoError::InternalError(err.to_string())
    }
}

impl From<serde_json::Error> for EcoError {
    fn from(err: serde_json::Error) -> Self {
        EcoError::InternalError(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_kinds() {
        assert_eq!(
            EcoError::MissingBand("thermal".into()).kind(),
            ErrorKind::Precondition
        );
        assert_eq!(EcoError::EmptyRequest.kind(), ErrorKind::Precondition);
        assert_eq!(
            EcoError::shape_mismatch((2, 2), (3, 2)).kind(),
            ErrorKind::Precondition
        );
    }

    #[test]
    fn test_transient_errors() {
        assert!(EcoError::StorageError("503".into()).is_transient());
        assert!(EcoError::RasterRead("reset".into()).is_transient());
        assert!(!EcoError::RasterDecode("bad ifd".into()).is_transient());
        assert!(!EcoError::InsufficientData("1 pixel".into()).is_transient());
    }

    #[test]
    fn test_display_is_verbatim() {
        let err = EcoError::shape_mismatch((4, 4), (4, 3));
        assert_eq!(err.to_string(), "Shape mismatch: expected 4x4, got 4x3");
    }
}
