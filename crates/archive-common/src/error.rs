//! Error types for the forecast archiver.

use thiserror::Error;

/// Result type alias using ArchiveError.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Primary error type for archiving operations.
///
/// Every per-file failure is one of these variants. The orchestrator reduces
/// anything except [`ArchiveError::Configuration`] to "this file contributed
/// zero records".
#[derive(Debug, Error)]
pub enum ArchiveError {
    // === Network Errors ===
    #[error("Transient network error for {url}: {message}")]
    TransientNetwork { url: String, message: String },

    #[error("File missing: {0}")]
    MissingFile(String),

    #[error("Unexpected HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    // === Data Errors ===
    #[error("Required fields not found in {url}: {detail}")]
    FieldNotFound { url: String, detail: String },

    #[error("Decode failed: {0}")]
    Decode(String),

    // === Run Errors ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    /// Whether the failed call may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ArchiveError::TransientNetwork { .. })
    }

    /// Whether the error aborts the whole run rather than a single file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ArchiveError::Configuration(_))
    }

    /// Stable short label used in log fields and run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            ArchiveError::TransientNetwork { .. } => "transient_network",
            ArchiveError::MissingFile(_) => "missing_file",
            ArchiveError::HttpStatus { .. } => "http_status",
            ArchiveError::FieldNotFound { .. } => "field_not_found",
            ArchiveError::Decode(_) => "decode",
            ArchiveError::Configuration(_) => "configuration",
            ArchiveError::Storage(_) => "storage",
            ArchiveError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_retry() {
        let transient = ArchiveError::TransientNetwork {
            url: "https://example.com/a.grib2".to_string(),
            message: "timed out".to_string(),
        };
        assert!(transient.is_retryable());
        assert!(!ArchiveError::MissingFile("x".to_string()).is_retryable());
        assert!(!ArchiveError::HttpStatus { url: "x".to_string(), status: 400 }.is_retryable());
    }

    #[test]
    fn test_only_configuration_is_fatal() {
        assert!(ArchiveError::Configuration("unknown model".to_string()).is_fatal());
        assert!(!ArchiveError::Decode("bad message".to_string()).is_fatal());
        assert_eq!(ArchiveError::Decode("bad".to_string()).kind(), "decode");
    }
}
