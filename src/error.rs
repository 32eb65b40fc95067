//! Error types for genserve
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur while serving generation jobs
#[derive(Debug, Error)]
pub enum GenserveError {
    /// Job body is missing required fields or has malformed values
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// Engine failed to initialize or to run a refinement step
    #[error("Engine error: {0}")]
    Engine(String),

    /// Copying the engine output into a snapshot failed
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Uploading an artifact to durable storage failed
    #[error("Publish error: {0}")]
    Publish(String),

    /// Run was cancelled at a step boundary
    #[error("Run cancelled")]
    Cancelled,

    /// Engine did not report completion within the configured step limit
    #[error("Engine did not complete within {0} steps")]
    StepLimit(u32),

    /// Warm-up isolate could not be launched
    #[error("Warm-up error: {0}")]
    Warmup(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for genserve operations
pub type Result<T> = std::result::Result<T, GenserveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_job_error() {
        let err = GenserveError::InvalidJob("missing prompt".to_string());
        assert_eq!(err.to_string(), "Invalid job: missing prompt");
    }

    #[test]
    fn test_engine_error() {
        let err = GenserveError::Engine("weights not found".to_string());
        assert_eq!(err.to_string(), "Engine error: weights not found");
    }

    #[test]
    fn test_step_limit_error() {
        let err = GenserveError::StepLimit(500);
        assert_eq!(err.to_string(), "Engine did not complete within 500 steps");
    }

    #[test]
    fn test_cancelled_error() {
        assert_eq!(GenserveError::Cancelled.to_string(), "Run cancelled");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: GenserveError = io_err.into();
        assert!(matches!(err, GenserveError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: GenserveError = json_err.into();
        assert!(matches!(err, GenserveError::Json(_)));
    }
}
