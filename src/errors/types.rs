//! Error type definitions for the stream health service
//!
//! This module defines all error types used throughout the crate, providing
//! a hierarchical error system that keeps the failing layer visible.

use thiserror::Error;

/// Top-level application error type
///
/// This enum represents all errors that can cross a module boundary. It uses
/// `thiserror` to provide automatic error trait implementations and proper
/// error chaining.
#[derive(Error, Debug)]
pub enum AppError {
    /// Stream statistics storage errors
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Remote channel-manager API errors
    #[error("Remote API error: {0}")]
    Client(#[from] ClientError),

    /// Probe subprocess errors
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    /// Resource not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

/// Repository layer specific errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Database errors from SeaORM
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Stored value could not be mapped back into the domain model
    #[error("Invalid stored value: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// Record not found
    #[error("Record not found: {table} with {field} = {value}")]
    RecordNotFound {
        table: String,
        field: String,
        value: String,
    },
}

/// Remote channel-manager client errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport level failures (connect, TLS, timeout)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The remote API answered with a non-success status
    #[error("HTTP error: {status} - {message}")]
    Status { status: u16, message: String },

    /// The response body did not match the expected shape
    #[error("Unexpected response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    /// Base URL or endpoint could not be built
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Errors raised while running ffprobe/ffmpeg against a stream
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The subprocess could not be started
    #[error("Failed to execute {command}: {message}")]
    Spawn { command: String, message: String },

    /// The subprocess exceeded its deadline and was killed
    #[error("Probe timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The subprocess exited unsuccessfully
    #[error("Probe exited with code {code:?}: {message}")]
    ExitStatus { code: Option<i32>, message: String },

    /// Diagnostic output could not be interpreted
    #[error("Malformed probe output: {0}")]
    MalformedOutput(String),
}

impl ProbeError {
    /// Whether this error represents a hit deadline rather than a failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProbeError::Timeout { .. })
    }
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl ClientError {
    /// Create a decode error for an endpoint
    pub fn decode<E: Into<String>, M: Into<String>>(endpoint: E, message: M) -> Self {
        Self::Decode {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::not_found("channel", "42");
        assert_eq!(err.to_string(), "Not found: channel with id 42");

        let err = AppError::from(ProbeError::Timeout { seconds: 30 });
        assert_eq!(err.to_string(), "Probe error: Probe timed out after 30s");
    }

    #[test]
    fn test_probe_error_timeout_classification() {
        assert!(ProbeError::Timeout { seconds: 5 }.is_timeout());
        assert!(!ProbeError::MalformedOutput("x".into()).is_timeout());
    }
}
