//! Typed envelope field values.

use serde::{Deserialize, Serialize};

use crate::Envelope;

/// Opaque handle for a call paused on user interaction.
///
/// Only the provider that issued a token can interpret it; consumers hand it
/// to their UI layer unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResumeToken(Vec<u8>);

impl ResumeToken {
    /// Wraps raw token bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw token bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the token, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// A single typed field of an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Value {
    /// UTF-8 string.
    String(String),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// Boolean flag.
    Bool(bool),
    /// Byte sequence.
    Bytes(Vec<u8>),
    /// Array of byte sequences.
    BytesArray(Vec<Vec<u8>>),
    /// Nested envelope.
    Envelope(Box<Envelope>),
    /// Resumable interaction token.
    Token(ResumeToken),
    /// Array of 32-bit integers.
    IntArray(Vec<i32>),
}

impl Value {
    /// Wire tag for [`Value::String`].
    pub(crate) const TAG_STRING: u8 = 0;
    /// Wire tag for [`Value::Int`].
    pub(crate) const TAG_INT: u8 = 1;
    /// Wire tag for [`Value::Long`].
    pub(crate) const TAG_LONG: u8 = 2;
    /// Wire tag for [`Value::Bool`].
    pub(crate) const TAG_BOOL: u8 = 3;
    /// Wire tag for [`Value::Bytes`].
    pub(crate) const TAG_BYTES: u8 = 4;
    /// Wire tag for [`Value::BytesArray`].
    pub(crate) const TAG_BYTES_ARRAY: u8 = 5;
    /// Wire tag for [`Value::Envelope`].
    pub(crate) const TAG_ENVELOPE: u8 = 6;
    /// Wire tag for [`Value::Token`].
    pub(crate) const TAG_TOKEN: u8 = 7;
    /// Wire tag for [`Value::IntArray`].
    pub(crate) const TAG_INT_ARRAY: u8 = 8;

    /// The wire tag of this value.
    pub(crate) const fn tag(&self) -> u8 {
        match self {
            Self::String(_) => Self::TAG_STRING,
            Self::Int(_) => Self::TAG_INT,
            Self::Long(_) => Self::TAG_LONG,
            Self::Bool(_) => Self::TAG_BOOL,
            Self::Bytes(_) => Self::TAG_BYTES,
            Self::BytesArray(_) => Self::TAG_BYTES_ARRAY,
            Self::Envelope(_) => Self::TAG_ENVELOPE,
            Self::Token(_) => Self::TAG_TOKEN,
            Self::IntArray(_) => Self::TAG_INT_ARRAY,
        }
    }

    /// Short type name, for diagnostics.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Bool(_) => "bool",
            Self::Bytes(_) => "bytes",
            Self::BytesArray(_) => "bytes[]",
            Self::Envelope(_) => "envelope",
            Self::Token(_) => "token",
            Self::IntArray(_) => "int[]",
        }
    }

    /// Returns the string, if this is a [`Value::String`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer, if this is a [`Value::Int`].
    pub const fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the integer, widening [`Value::Int`] to `i64`.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            Self::Int(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Returns the flag, if this is a [`Value::Bool`].
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the bytes, if this is a [`Value::Bytes`].
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the nested envelope, if this is a [`Value::Envelope`].
    pub fn as_envelope(&self) -> Option<&Envelope> {
        match self {
            Self::Envelope(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the token, if this is a [`Value::Token`].
    pub const fn as_token(&self) -> Option<&ResumeToken> {
        match self {
            Self::Token(t) => Some(t),
            _ => None,
        }
    }

    /// Returns the integer array, if this is a [`Value::IntArray`].
    pub fn as_int_array(&self) -> Option<&[i32]> {
        match self {
            Self::IntArray(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl From<Vec<Vec<u8>>> for Value {
    fn from(v: Vec<Vec<u8>>) -> Self {
        Self::BytesArray(v)
    }
}

impl From<Envelope> for Value {
    fn from(v: Envelope) -> Self {
        Self::Envelope(Box::new(v))
    }
}

impl From<ResumeToken> for Value {
    fn from(v: ResumeToken) -> Self {
        Self::Token(v)
    }
}

impl From<Vec<i32>> for Value {
    fn from(v: Vec<i32>) -> Self {
        Self::IntArray(v)
    }
}
