//! Common error types for the live-session crates.

use thiserror::Error;

/// Errors raised while constructing shared types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// An identifier was empty or contained whitespace
    #[error("Invalid {kind} identifier: {value:?}")]
    InvalidIdentifier {
        /// Which identifier failed validation
        kind: &'static str,
        /// The rejected value
        value: String,
    },
}

/// Result type alias using `CommonError`
pub type Result<T> = std::result::Result<T, CommonError>;
