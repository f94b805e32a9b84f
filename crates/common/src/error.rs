//! Common error types for Rendezvous components.

use thiserror::Error;

/// Errors raised while handling shared value types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// An identifier did not match its expected shape
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Result type alias using `CommonError`
pub type Result<T> = std::result::Result<T, CommonError>;
