//! # Codec Errors
//!
//! Failures raised while turning a `Value` into its wire form. Decoding never
//! fails, so every variant here belongs to the encode direction or to value
//! construction.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// A value could not be represented on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A container held an element with no JSON representation.
    #[error("cannot serialize {kind}: {reason}")]
    NotRepresentable { kind: &'static str, reason: String },

    /// The opaque-object codec rejected the value.
    #[error("opaque serialization failed: {0}")]
    Opaque(String),

    /// Numeric array shape does not match its element count.
    #[error("array shape {shape:?} does not describe {len} elements")]
    ShapeMismatch { shape: Vec<usize>, len: usize },
}

impl From<rmp_serde::encode::Error> for CodecError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        CodecError::Opaque(e.to_string())
    }
}
