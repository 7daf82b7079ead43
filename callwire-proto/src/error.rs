//! Decoding errors for records and envelopes.

use std::io;

/// Reasons a versioned record or envelope could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The input ended before a field was complete.
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes the field required.
        needed: usize,
        /// Bytes left in the enclosing record.
        remaining: usize,
    },

    /// A length prefix was negative where absence is not allowed.
    #[error("negative length {0}")]
    NegativeLength(i32),

    /// A string field did not hold valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// A string field that must be present was encoded as absent.
    #[error("missing required string field")]
    MissingString,

    /// The same key appeared twice in one envelope.
    #[error("duplicate field key {0:?}")]
    DuplicateKey(String),

    /// Nested envelopes exceeded the depth limit.
    #[error("envelope nesting exceeds {0} levels")]
    TooDeep(usize),

    /// Bytes were left over after the top-level record.
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
}

impl From<DecodeError> for io::Error {
    fn from(e: DecodeError) -> Self {
        Self::new(io::ErrorKind::InvalidData, e)
    }
}
