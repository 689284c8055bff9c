//! Centralized error handling for the stream health service
//!
//! Errors are grouped by the layer that raises them so callers can match on
//! the category they care about while still converting everything into a
//! single [`AppError`] at the edges.
//!
//! # Error Categories
//!
//! - **Repository Errors**: stream statistics storage failures
//! - **Client Errors**: remote channel-manager API failures
//! - **Probe Errors**: ffprobe/ffmpeg subprocess failures
//! - **Validation / Configuration Errors**: bad task or schedule settings
//!
//! # Usage
//!
//! ```rust
//! use stream_health::errors::{AppError, AppResult};
//!
//! fn example_function() -> AppResult<String> {
//!     Ok("success".to_string())
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for Repository Results
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Convenience type alias for remote client Results
pub type ClientResult<T> = Result<T, ClientError>;
