// SPDX-FileCopyrightText: © 2026 IngestKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured error types for IngestKit.
//!
//! All errors are handled at the stage that detects them; nothing crosses a
//! stage boundary as a panic. Fatal errors terminate the reporting stage
//! only, the rest of the pipeline keeps running.

use thiserror::Error;

/// Main error type for IngestKit operations.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Configuration or parameter validation error.
    ///
    /// Examples:
    /// - Ring created with a zero or inverted size bound
    /// - A channel pair that does not fit the capture layout
    /// - Invalid encoder parameters
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Runtime processing error during normal operation.
    ///
    /// Examples:
    /// - A stage queue closed underneath a producer
    /// - Malformed upstream signaling data
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Codec-specific error (encoding, format negotiation).
    #[error("Codec error: {0}")]
    Codec(String),

    /// I/O error (forensics journaling, device access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource exhaustion or limit exceeded.
    ///
    /// Examples:
    /// - Stage startup allocation failed
    /// - Queue growth past the configured alarm threshold
    #[error("Resource exhaustion: {0}")]
    ResourceExhausted(String),
}

/// Convenience type alias for Results using `IngestError`.
pub type Result<T> = std::result::Result<T, IngestError>;

impl From<String> for IngestError {
    fn from(s: String) -> Self {
        Self::Runtime(s)
    }
}

impl From<&str> for IngestError {
    fn from(s: &str) -> Self {
        Self::Runtime(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IngestError::Configuration("initial size exceeds maximum".to_string());
        assert_eq!(err.to_string(), "Configuration error: initial size exceeds maximum");

        let err = IngestError::Codec("encoder rejected frame".to_string());
        assert_eq!(err.to_string(), "Codec error: encoder rejected frame");
    }

    #[test]
    fn test_string_to_error_conversion() {
        let err: IngestError = "queue closed".into();
        assert_eq!(err.to_string(), "Runtime error: queue closed");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "journal dir missing");
        let err: IngestError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
        assert!(err.to_string().contains("journal dir missing"));
    }
}
