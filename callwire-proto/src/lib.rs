//! Wire format for callwire cross-process calls.
//!
//! A call is carried by an [`Envelope`]: one action name, the sender's
//! `api_version` and a flat map of typed [`Value`] fields. Envelopes and the
//! structs they carry ([`ErrorDetails`], [`FileMetadata`]) are encoded as
//! versioned records (`i32 version | i32 byte_length | fields`) so peers built
//! against different revisions of the contract can skip what they do not
//! understand.
//!
//! On stream transports, envelopes and handshake messages travel in frames
//! with a 4-byte big-endian length prefix (see [`codec`]).

pub mod catalogue;
pub mod codec;
mod details;
mod envelope;
mod error;
mod message;
mod metadata;
pub mod record;
mod value;

pub use catalogue::{API_VERSION, action, extra, result};
pub use codec::{
    decode, encode, read_frame, recv, recv_envelope, recv_frame, send, send_envelope, send_frame,
    write_frame,
};
pub use details::ErrorDetails;
pub use envelope::{Envelope, Fields};
pub use error::DecodeError;
pub use message::{Hello, HelloAck};
pub use metadata::FileMetadata;
pub use record::{RecordReader, RecordWriter, VersionedRecord};
pub use value::{ResumeToken, Value};
