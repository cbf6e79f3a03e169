//! Error types for identifier parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The identifier string is empty.
    #[error("ID cannot be empty")]
    Empty,

    /// The string is not a hyphenated UUID.
    #[error("invalid UUID '{input}': {message}")]
    InvalidUuid { input: String, message: String },

    /// The nil UUID was supplied where a real identifier is required.
    #[error("nil UUID is not a valid {kind}")]
    Nil { kind: &'static str },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }

    /// Returns true if the input was the nil sentinel.
    pub fn is_nil(&self) -> bool {
        matches!(self, IdError::Nil { .. })
    }
}
