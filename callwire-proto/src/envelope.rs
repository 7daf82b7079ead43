//! The call envelope and its record encoding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record::{RecordReader, RecordWriter, write_record};
use crate::{DecodeError, ResumeToken, Value};

/// Field map carried by an [`Envelope`].
pub type Fields = BTreeMap<String, Value>;

/// Record version written for envelopes.
const ENVELOPE_FORMAT: i32 = 1;

/// Maximum nesting of [`Value::Envelope`] fields.
const MAX_DEPTH: usize = 32;

/// One action plus a flat set of typed fields.
///
/// Fields are keyed by name; presence of a key, not its value, is what makes
/// an optional parameter "set".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// Action identifier (opaque to the core).
    action: String,
    /// Protocol version declared by the sender.
    api_version: i32,
    /// Named fields.
    fields: Fields,
}

impl Envelope {
    /// Creates an envelope for `action` with no fields.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            api_version: 0,
            fields: Fields::new(),
        }
    }

    /// Creates an envelope with no action, as used for results.
    pub fn result() -> Self {
        Self::default()
    }

    /// The action identifier.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Replaces the action identifier.
    pub fn set_action(&mut self, action: impl Into<String>) {
        self.action = action.into();
    }

    /// The sender's declared protocol version.
    pub const fn api_version(&self) -> i32 {
        self.api_version
    }

    /// Stamps the sender's protocol version.
    pub const fn set_api_version(&mut self, version: i32) {
        self.api_version = version;
    }

    /// Adds a field, builder style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets a field, returning the previous value for that key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    /// Removes a field.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// Returns `true` if `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Looks up a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Looks up a string field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Looks up an `i32` field.
    pub fn get_int(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(Value::as_int)
    }

    /// Looks up an integer field, widening `i32` values.
    pub fn get_long(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_long)
    }

    /// Looks up a boolean field.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Looks up a byte-sequence field.
    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        self.get(key).and_then(Value::as_bytes)
    }

    /// Looks up a resumable-token field.
    pub fn get_token(&self, key: &str) -> Option<&ResumeToken> {
        self.get(key).and_then(Value::as_token)
    }

    /// All fields.
    pub const fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Consumes the envelope, returning its fields.
    pub fn into_fields(self) -> Fields {
        self.fields
    }

    /// Copies every entry of `extra` into this envelope, overwriting keys
    /// that are already set.
    pub fn merge(&mut self, extra: impl IntoIterator<Item = (String, Value)>) {
        self.fields.extend(extra);
    }

    /// Encodes the envelope as a versioned record.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_record(&mut out, ENVELOPE_FORMAT, |w| self.write_fields(w));
        out
    }

    /// Decodes an envelope produced by [`encode`](Self::encode).
    ///
    /// Unknown field tags are skipped; a higher `api_version` than ours is
    /// accepted as is.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = RecordReader::new(bytes);
        let env = Self::read_from(&mut r, 0)?;
        if r.is_empty() {
            Ok(env)
        } else {
            Err(DecodeError::TrailingBytes(r.remaining()))
        }
    }

    /// Writes `action`, `api_version` and the field entries.
    fn write_fields(&self, w: &mut RecordWriter<'_>) {
        w.put_str(&self.action);
        w.put_i32(self.api_version);
        w.put_len(self.fields.len());
        for (key, value) in &self.fields {
            w.put_str(key);
            w.put_u8(value.tag());
            w.put_sized(|p| write_value(p, value));
        }
    }

    /// Reads one envelope record at nesting level `depth`.
    fn read_from(r: &mut RecordReader<'_>, depth: usize) -> Result<Self, DecodeError> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::TooDeep(MAX_DEPTH));
        }
        r.get_record(|_version, body| {
            let action = body.get_str()?;
            let api_version = body.get_i32()?;
            let count = body.get_len()?;
            let mut fields = Fields::new();
            for _ in 0..count {
                let key = body.get_str()?;
                let tag = body.get_u8()?;
                let payload = body.get_bytes()?;
                let Some(value) = read_value(tag, payload, depth)? else {
                    tracing::debug!(key = %key, tag, "skipping field with unknown value tag");
                    continue;
                };
                if fields.contains_key(&key) {
                    return Err(DecodeError::DuplicateKey(key));
                }
                fields.insert(key, value);
            }
            Ok(Self {
                action,
                api_version,
                fields,
            })
        })
    }
}

/// Writes the payload of one value (without tag or length).
fn write_value(w: &mut RecordWriter<'_>, value: &Value) {
    match value {
        Value::String(s) => w.put_str(s),
        Value::Int(v) => w.put_i32(*v),
        Value::Long(v) => w.put_i64(*v),
        Value::Bool(v) => w.put_bool(*v),
        Value::Bytes(b) => w.put_bytes(b),
        Value::BytesArray(items) => {
            w.put_len(items.len());
            for item in items {
                w.put_bytes(item);
            }
        }
        Value::Envelope(env) => {
            w.put_record(ENVELOPE_FORMAT, |inner| env.write_fields(inner));
        }
        Value::Token(t) => w.put_bytes(t.as_bytes()),
        Value::IntArray(items) => {
            w.put_len(items.len());
            for item in items {
                w.put_i32(*item);
            }
        }
    }
}

/// Decodes one value payload; `Ok(None)` for tags this version does not know.
fn read_value(tag: u8, payload: &[u8], depth: usize) -> Result<Option<Value>, DecodeError> {
    let mut r = RecordReader::new(payload);
    let value = match tag {
        Value::TAG_STRING => Value::String(r.get_str()?),
        Value::TAG_INT => Value::Int(r.get_i32()?),
        Value::TAG_LONG => Value::Long(r.get_i64()?),
        Value::TAG_BOOL => Value::Bool(r.get_bool()?),
        Value::TAG_BYTES => Value::Bytes(r.get_bytes()?.to_vec()),
        Value::TAG_BYTES_ARRAY => {
            let n = r.get_len()?;
            let mut items = Vec::with_capacity(n.min(r.remaining() / 4));
            for _ in 0..n {
                items.push(r.get_bytes()?.to_vec());
            }
            Value::BytesArray(items)
        }
        Value::TAG_ENVELOPE => Value::Envelope(Box::new(Envelope::read_from(&mut r, depth + 1)?)),
        Value::TAG_TOKEN => Value::Token(ResumeToken::new(r.get_bytes()?)),
        Value::TAG_INT_ARRAY => {
            let n = r.get_len()?;
            let mut items = Vec::with_capacity(n.min(r.remaining() / 4));
            for _ in 0..n {
                items.push(r.get_i32()?);
            }
            Value::IntArray(items)
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        let inner = Envelope::new("inner.action")
            .with("depth", 1)
            .with("note", "nested");
        let mut env = Envelope::new("org.example.ECHO")
            .with("body", "hi")
            .with("count", 3)
            .with("size", 1i64 << 40)
            .with("armor", true)
            .with("blob", vec![0u8, 1, 2, 255])
            .with("chunks", vec![b"a".to_vec(), Vec::new(), b"ccc".to_vec()])
            .with("inner", inner)
            .with("token", ResumeToken::new(b"resume-me".to_vec()))
            .with("versions", vec![1, 2, 3]);
        env.set_api_version(1);
        env
    }

    #[test]
    fn roundtrip_preserves_every_value_kind() {
        let env = sample();
        let decoded = Envelope::decode(&env.encode()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn roundtrip_empty_envelope() {
        let env = Envelope::result();
        assert_eq!(Envelope::decode(&env.encode()).unwrap(), env);
    }

    #[test]
    fn higher_api_version_is_accepted() {
        let mut env = Envelope::new("x");
        env.set_api_version(i32::MAX);
        assert_eq!(Envelope::decode(&env.encode()).unwrap().api_version(), i32::MAX);
    }

    #[test]
    fn unknown_value_tag_is_skipped() {
        // Hand-build an envelope with one known and one unknown field.
        let mut buf = Vec::new();
        write_record(&mut buf, ENVELOPE_FORMAT, |w| {
            w.put_str("act");
            w.put_i32(7);
            w.put_len(2);
            w.put_str("future");
            w.put_u8(200);
            w.put_sized(|p| {
                p.put_i64(1);
                p.put_str("whatever a newer peer sends");
            });
            w.put_str("body");
            w.put_u8(Value::TAG_STRING);
            w.put_sized(|p| p.put_str("kept"));
        });

        let env = Envelope::decode(&buf).unwrap();
        assert_eq!(env.action(), "act");
        assert_eq!(env.get_str("body"), Some("kept"));
        assert!(!env.contains("future"));
    }

    #[test]
    fn appended_envelope_fields_are_skipped() {
        // A newer writer appends fields after the entry list.
        let mut buf = Vec::new();
        write_record(&mut buf, 2, |w| {
            w.put_str("act");
            w.put_i32(2);
            w.put_len(1);
            w.put_str("k");
            w.put_u8(Value::TAG_INT);
            w.put_sized(|p| p.put_i32(5));
            w.put_i64(0x0123_4567);
        });
        let env = Envelope::decode(&buf).unwrap();
        assert_eq!(env.get_int("k"), Some(5));
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let mut buf = Vec::new();
        write_record(&mut buf, ENVELOPE_FORMAT, |w| {
            w.put_str("act");
            w.put_i32(1);
            w.put_len(2);
            for v in [1, 2] {
                w.put_str("k");
                w.put_u8(Value::TAG_INT);
                w.put_sized(|p| p.put_i32(v));
            }
        });
        assert_eq!(
            Envelope::decode(&buf).unwrap_err(),
            DecodeError::DuplicateKey("k".into())
        );
    }

    #[test]
    fn truncated_envelope_is_rejected() {
        let bytes = sample().encode();
        assert!(Envelope::decode(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = sample().encode();
        bytes.push(0);
        assert_eq!(
            Envelope::decode(&bytes).unwrap_err(),
            DecodeError::TrailingBytes(1)
        );
    }

    #[test]
    fn excessive_nesting_is_rejected() {
        let mut env = Envelope::new("leaf");
        for _ in 0..=MAX_DEPTH {
            env = Envelope::new("wrap").with("e", env);
        }
        assert_eq!(
            Envelope::decode(&env.encode()).unwrap_err(),
            DecodeError::TooDeep(MAX_DEPTH)
        );
    }

    #[test]
    fn merge_overwrites_existing_keys() {
        let mut env = Envelope::new("a").with("keep", 1).with("swap", "old");
        let extra = Envelope::result().with("swap", "new").with("added", true);
        env.merge(extra.into_fields());
        assert_eq!(env.get_int("keep"), Some(1));
        assert_eq!(env.get_str("swap"), Some("new"));
        assert_eq!(env.get_bool("added"), Some(true));
        assert_eq!(env.action(), "a");
    }

    #[test]
    fn int_fields_widen_to_long() {
        let env = Envelope::new("a").with("small", -7).with("big", i64::MAX);
        assert_eq!(env.get_long("small"), Some(-7));
        assert_eq!(env.get_long("big"), Some(i64::MAX));
        assert_eq!(env.get_int("big"), None);
    }
}
