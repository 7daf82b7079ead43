//! Metadata describing a streamed file payload.

use crate::DecodeError;
use crate::record::{RecordReader, RecordWriter, VersionedRecord};

/// Describes the file behind a streamed payload.
///
/// Version 2 added [`charset`](Self::charset); version 1 readers skip it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMetadata {
    /// Original file name.
    pub filename: Option<String>,
    /// MIME type of the payload.
    pub mime_type: Option<String>,
    /// Modification time in milliseconds since the Unix epoch.
    pub modification_time: i64,
    /// Size of the payload before any transformation.
    pub original_size: i64,
    /// Text charset, for textual payloads.
    pub charset: Option<String>,
}

impl VersionedRecord for FileMetadata {
    const VERSION: i32 = 2;

    fn write_fields(&self, w: &mut RecordWriter<'_>) {
        // version 1
        w.put_opt_str(self.filename.as_deref());
        w.put_opt_str(self.mime_type.as_deref());
        w.put_i64(self.modification_time);
        w.put_i64(self.original_size);
        // version 2
        w.put_opt_str(self.charset.as_deref());
    }

    fn read_fields(version: i32, r: &mut RecordReader<'_>) -> Result<Self, DecodeError> {
        let mut meta = Self {
            filename: r.get_opt_str()?,
            mime_type: r.get_opt_str()?,
            modification_time: r.get_i64()?,
            original_size: r.get_i64()?,
            charset: None,
        };
        if version >= 2 {
            meta.charset = r.get_opt_str()?;
        }
        Ok(meta)
    }
}
