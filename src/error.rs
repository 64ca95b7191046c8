//! Custom error types for testmend.
//!
//! Test bodies themselves fail with `anyhow::Error`; those failures are
//! captured into the handoff record and never surface here. `MendError`
//! covers everything around them: configuration, the page driver, the
//! artifact sink, the diagnosis store, fix application and retry
//! exhaustion.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for testmend operations
#[derive(Error, Debug)]
pub enum MendError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // =========================================================================
    // Driver Errors
    // =========================================================================
    /// The page driver rejected or failed an operation
    #[error("Page driver error during {operation}: {message}")]
    Driver { operation: String, message: String },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// Writing to the artifact sink failed
    #[error("Artifact sink failed to write '{id}': {message}")]
    ArtifactSink { id: String, message: String },

    /// The diagnosis store rejected an insert
    #[error("Diagnosis store error: {message}")]
    DiagnosisStore { message: String },

    // =========================================================================
    // Fix Application Errors
    // =========================================================================
    /// The script interpreter could not be found
    #[error("Interpreter '{interpreter}' not found for fix script")]
    MissingInterpreter { interpreter: String },

    /// A fix script exited unsuccessfully
    #[error("Fix script {path} failed with exit code {exit_code}: {stderr}")]
    FixScript {
        path: String,
        exit_code: i32,
        stderr: String,
    },

    /// A fix script exceeded its time budget
    #[error("Fix script {path} timed out after {timeout_ms}ms")]
    FixTimeout { path: String, timeout_ms: u64 },

    // =========================================================================
    // Retry Errors
    // =========================================================================
    /// All retry attempts for a test failed; carries the last observed error
    #[error("Test '{test_name}' failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        test_name: String,
        attempts: u32,
        last_error: String,
    },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MendError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create a page driver error
    pub fn driver(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Driver {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an artifact sink error
    pub fn artifact(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ArtifactSink {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create a diagnosis store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::DiagnosisStore {
            message: message.into(),
        }
    }

    /// Whether a later attempt at the same operation could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Driver { .. } | Self::FixTimeout { .. } | Self::DiagnosisStore { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::RetriesExhausted { .. } => 2,
            Self::FixScript { .. } | Self::FixTimeout { .. } | Self::MissingInterpreter { .. } => 3,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            _ => 1,
        }
    }
}

/// Type alias for testmend results
pub type Result<T> = std::result::Result<T, MendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retries_exhausted_display_carries_last_error() {
        let err = MendError::RetriesExhausted {
            test_name: "Checkout".into(),
            attempts: 3,
            last_error: "net::ERR_CONNECTION_REFUSED".into(),
        };
        let text = err.to_string();
        assert!(text.contains("Checkout"));
        assert!(text.contains("3 attempts"));
        assert!(text.contains("net::ERR_CONNECTION_REFUSED"));
    }

    #[test]
    fn test_is_transient() {
        assert!(MendError::driver("screenshot", "target closed").is_transient());
        assert!(MendError::store("connection reset").is_transient());
        assert!(!MendError::config("bad").is_transient());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MendError::config("x").exit_code(), 7);
        assert_eq!(
            MendError::FixTimeout {
                path: "fix-1.sh".into(),
                timeout_ms: 10
            }
            .exit_code(),
            3
        );
        assert_eq!(MendError::artifact("fix-1", "disk full").exit_code(), 1);
    }

    #[test]
    fn test_config_with_path() {
        let path = PathBuf::from("/tmp/settings.json");
        match MendError::config_with_path("failed to parse", path.clone()) {
            MendError::Config {
                message,
                path: opt_path,
            } => {
                assert_eq!(message, "failed to parse");
                assert_eq!(opt_path, Some(path));
            }
            other => panic!("Wrong error variant: {other:?}"),
        }
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: MendError = io_err.into();
        assert!(matches!(err, MendError::Io(_)));
        assert!(err.to_string().contains("access denied"));
    }
}
