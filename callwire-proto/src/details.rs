//! Provider error details carried in `RESULT_ERROR`.

use crate::record::{RecordReader, RecordWriter, VersionedRecord};
use crate::{DecodeError, Value};

/// Error identifier and message reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetails {
    /// One of the `*_ERROR` / `*_VERSIONS` ids, or a provider-specific code.
    pub error_id: i32,
    /// Human-readable description.
    pub message: String,
}

impl ErrorDetails {
    /// Unclassified failure.
    pub const GENERIC_ERROR: i32 = 0;
    /// The peers share no usable API version.
    pub const INCOMPATIBLE_API_VERSIONS: i32 = 1;
    /// The referenced account does not exist or is not accessible.
    pub const NO_OR_WRONG_ACCOUNT: i32 = 2;
    /// A callback registration request was malformed.
    pub const INVALID_REGISTRATION: i32 = 3;

    /// Creates error details.
    pub fn new(error_id: i32, message: impl Into<String>) -> Self {
        Self {
            error_id,
            message: message.into(),
        }
    }

    /// Encodes the details as a [`Value::Bytes`] record.
    pub fn to_value(&self) -> Value {
        Value::Bytes(self.to_bytes())
    }

    /// Decodes details from a [`Value::Bytes`] record.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_bytes().and_then(|b| Self::from_bytes(b).ok())
    }
}

impl VersionedRecord for ErrorDetails {
    const VERSION: i32 = 1;

    fn write_fields(&self, w: &mut RecordWriter<'_>) {
        w.put_i32(self.error_id);
        w.put_opt_str(Some(&self.message));
    }

    fn read_fields(_version: i32, r: &mut RecordReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            error_id: r.get_i32()?,
            message: r.get_opt_str()?.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_survive_value_encoding() {
        let d = ErrorDetails::new(ErrorDetails::NO_OR_WRONG_ACCOUNT, "no such account");
        assert_eq!(ErrorDetails::from_value(&d.to_value()), Some(d));
    }

    #[test]
    fn non_bytes_value_yields_none() {
        assert_eq!(ErrorDetails::from_value(&Value::Int(3)), None);
    }
}
