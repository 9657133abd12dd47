//! Error types for dataset parsing and encoding

use thiserror::Error;

use crate::tags::Tag;

/// Result type alias for data-layer operations
pub type Result<T> = std::result::Result<T, DataError>;

/// Error types that can occur while decoding or mutating DICOM data
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Unexpected tag {0} where an item header was required")]
    UnexpectedItemTag(Tag),

    #[error("Malformed stream: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DataError {
    /// Create a new type mismatch error
    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        Self::TypeMismatch(msg.into())
    }

    /// Create a new malformed stream error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}
