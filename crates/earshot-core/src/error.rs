//! Error types for earshot-core.

use thiserror::Error;

/// Result type for earshot-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while configuring the assignment engine.
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    /// The proximity limit must be a finite, positive number.
    #[error("invalid distance limit: {0}")]
    InvalidDistanceLimit(f64),

    /// A named policy option did not match any known variant.
    #[error("unknown {option} '{value}'")]
    UnknownOption {
        option: &'static str,
        value: String,
    },
}
