//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A settings override had the wrong shape or an out-of-range value
    #[error("Invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },

    /// A constraint could not be accepted
    #[error("Invalid constraint for '{domain}': {reason}")]
    InvalidConstraint { domain: String, reason: String },

    /// An imported snapshot failed validation
    #[error("Invalid snapshot: {reason}")]
    InvalidSnapshot { reason: String },

    /// Parse error for incoming data
    #[error("Failed to parse {field}: {reason}")]
    ParseError { field: String, reason: String },
}

impl DomainError {
    /// Creates an invalid snapshot error from any displayable reason.
    pub fn snapshot<E: std::fmt::Display>(reason: E) -> Self {
        Self::InvalidSnapshot {
            reason: reason.to_string(),
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
