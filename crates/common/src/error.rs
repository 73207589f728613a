//! Common error types for session coordinator crates.

use thiserror::Error;

/// Common errors that can occur across session coordinator crates
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// Identifier failed validation (empty, too long, or control characters)
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Result type alias using `CommonError`
pub type Result<T> = std::result::Result<T, CommonError>;
