//! Versioned records: `i32 version | i32 byte_length | fields`.
//!
//! `byte_length` counts the bytes after itself up to the end of the record.
//! A reader decodes the fields it knows for the stored version and then
//! resumes at `start_of_fields + byte_length`, however many fields it
//! consumed. This is what lets a record grow new trailing fields without
//! breaking older readers.
//!
//! All integers are big-endian. Strings are an `i32` byte length (`-1` for
//! absent) followed by UTF-8 bytes.

use crate::DecodeError;

/// Appends primitive fields to a record body.
#[derive(Debug)]
pub struct RecordWriter<'a> {
    /// Destination buffer; the record header lives before the current end.
    out: &'a mut Vec<u8>,
}

impl RecordWriter<'_> {
    /// Writes a big-endian `i32`.
    pub fn put_i32(&mut self, v: i32) {
        self.out.extend_from_slice(&v.to_be_bytes());
    }

    /// Writes a big-endian `i64`.
    pub fn put_i64(&mut self, v: i64) {
        self.out.extend_from_slice(&v.to_be_bytes());
    }

    /// Writes a single byte.
    pub fn put_u8(&mut self, v: u8) {
        self.out.push(v);
    }

    /// Writes a boolean as one byte (`0` or `1`).
    pub fn put_bool(&mut self, v: bool) {
        self.out.push(u8::from(v));
    }

    /// Writes a length-prefixed byte sequence.
    pub fn put_bytes(&mut self, v: &[u8]) {
        self.put_len(v.len());
        self.out.extend_from_slice(v);
    }

    /// Writes a present string.
    pub fn put_str(&mut self, v: &str) {
        self.put_bytes(v.as_bytes());
    }

    /// Writes an optional string; `None` is encoded with length `-1`.
    pub fn put_opt_str(&mut self, v: Option<&str>) {
        match v {
            Some(s) => self.put_str(s),
            None => self.put_i32(-1),
        }
    }

    /// Writes a nested record with its own version and length header.
    pub fn put_record(&mut self, version: i32, fields: impl FnOnce(&mut RecordWriter<'_>)) {
        write_record(&mut *self.out, version, fields);
    }

    /// Writes a `byte_length`-style prefix for a payload of `len` bytes.
    pub fn put_len(&mut self, len: usize) {
        // Frames are capped far below i32::MAX, so saturation only ever
        // produces a record the reader rejects as truncated.
        self.put_i32(i32::try_from(len).unwrap_or(i32::MAX));
    }

    /// Writes a length-prefixed payload produced by `body`.
    ///
    /// The prefix is patched in after `body` returns.
    pub fn put_sized(&mut self, body: impl FnOnce(&mut RecordWriter<'_>)) {
        let size_pos = self.out.len();
        self.put_i32(0);
        let start = self.out.len();
        body(&mut RecordWriter {
            out: &mut *self.out,
        });
        patch_len(self.out, size_pos, start);
    }
}

/// Appends a complete record (header plus fields) to `out`.
pub fn write_record(out: &mut Vec<u8>, version: i32, fields: impl FnOnce(&mut RecordWriter<'_>)) {
    out.extend_from_slice(&version.to_be_bytes());
    let size_pos = out.len();
    out.extend_from_slice(&0i32.to_be_bytes());
    let start = out.len();
    fields(&mut RecordWriter { out: &mut *out });
    patch_len(out, size_pos, start);
}

/// Overwrites the placeholder at `size_pos` with the byte count since `start`.
fn patch_len(out: &mut [u8], size_pos: usize, start: usize) {
    let len = i32::try_from(out.len() - start).unwrap_or(i32::MAX);
    out[size_pos..size_pos + 4].copy_from_slice(&len.to_be_bytes());
}

/// Reads primitive fields from a bounded slice.
///
/// Every read is bounds-checked against the slice, so a reader handed the
/// body of one record can never run into the next one.
#[derive(Debug, Clone)]
pub struct RecordReader<'a> {
    /// Remaining unread input.
    buf: &'a [u8],
}

impl<'a> RecordReader<'a> {
    /// Creates a reader over `buf`.
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Number of unread bytes.
    pub const fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` when every byte has been consumed.
    pub const fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes exactly `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if n > self.buf.len() {
            return Err(DecodeError::Truncated {
                needed: n,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Consumes a fixed-size array.
    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut arr = [0u8; N];
        arr.copy_from_slice(self.take(N)?);
        Ok(arr)
    }

    /// Reads a big-endian `i32`.
    pub fn get_i32(&mut self) -> Result<i32, DecodeError> {
        self.take_array().map(i32::from_be_bytes)
    }

    /// Reads a big-endian `i64`.
    pub fn get_i64(&mut self) -> Result<i64, DecodeError> {
        self.take_array().map(i64::from_be_bytes)
    }

    /// Reads one byte.
    pub fn get_u8(&mut self) -> Result<u8, DecodeError> {
        self.take_array::<1>().map(|[b]| b)
    }

    /// Reads a boolean; any non-zero byte is `true`.
    pub fn get_bool(&mut self) -> Result<bool, DecodeError> {
        self.get_u8().map(|b| b != 0)
    }

    /// Reads a non-negative length prefix.
    pub fn get_len(&mut self) -> Result<usize, DecodeError> {
        let len = self.get_i32()?;
        usize::try_from(len).map_err(|_| DecodeError::NegativeLength(len))
    }

    /// Reads a length-prefixed byte sequence.
    pub fn get_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.get_len()?;
        self.take(len)
    }

    /// Reads a string that must be present.
    pub fn get_str(&mut self) -> Result<String, DecodeError> {
        self.get_opt_str()?.ok_or(DecodeError::MissingString)
    }

    /// Reads an optional string (`-1` length means absent).
    pub fn get_opt_str(&mut self) -> Result<Option<String>, DecodeError> {
        let len = self.get_i32()?;
        if len == -1 {
            return Ok(None);
        }
        let len = usize::try_from(len).map_err(|_| DecodeError::NegativeLength(len))?;
        let raw = self.take(len)?;
        std::str::from_utf8(raw)
            .map(|s| Some(s.to_owned()))
            .map_err(|_| DecodeError::InvalidUtf8)
    }

    /// Reads one record header and hands `(version, body)` to `fields`.
    ///
    /// This reader always advances past the whole record, whether or not
    /// `fields` consumed every byte of the body.
    pub fn get_record<T>(
        &mut self,
        fields: impl FnOnce(i32, &mut RecordReader<'a>) -> Result<T, DecodeError>,
    ) -> Result<T, DecodeError> {
        let version = self.get_i32()?;
        let body = self.get_bytes()?;
        fields(version, &mut RecordReader::new(body))
    }
}

/// A struct with a stable, versioned wire form.
///
/// Implementors bump [`VERSION`](Self::VERSION) whenever they append fields,
/// and only ever append: readers of older versions stop early and skip the
/// rest of the record.
pub trait VersionedRecord: Sized {
    /// Version written by this implementation.
    const VERSION: i32;

    /// Writes the body fields for [`VERSION`](Self::VERSION).
    fn write_fields(&self, w: &mut RecordWriter<'_>);

    /// Reads the body fields of a record stored with `version`.
    fn read_fields(version: i32, r: &mut RecordReader<'_>) -> Result<Self, DecodeError>;

    /// Appends this record, header included, to `out`.
    fn write_to(&self, out: &mut Vec<u8>) {
        write_record(out, Self::VERSION, |w| self.write_fields(w));
    }

    /// Reads one record from `r`, leaving `r` at the start of the next one.
    fn read_from(r: &mut RecordReader<'_>) -> Result<Self, DecodeError> {
        r.get_record(Self::read_fields)
    }

    /// Encodes this record as a standalone byte vector.
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }

    /// Decodes a standalone record; trailing bytes are an error.
    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = RecordReader::new(bytes);
        let rec = Self::read_from(&mut r)?;
        if r.is_empty() {
            Ok(rec)
        } else {
            Err(DecodeError::TrailingBytes(r.remaining()))
        }
    }
}
