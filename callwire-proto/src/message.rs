//! Connection handshake messages for stream transports.

use serde::{Deserialize, Serialize};

/// First frame on every connection, sent by the caller.
///
/// Each connection carries exactly one pipe or one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Hello {
    /// Open the read end of an output pipe for `request_id`.
    ///
    /// After [`HelloAck::Ready`] the connection carries raw bytes from the
    /// callee until EOF.
    OutputPipe {
        /// Caller-chosen pipe identifier, never reused.
        request_id: u32,
    },
    /// Execute one call.
    ///
    /// Followed by one envelope frame, then (if `has_input`) raw input bytes
    /// until the caller half-closes the connection.
    Execute {
        /// Output pipe previously opened for this call, if any.
        request_id: Option<u32>,
        /// Whether input bytes follow the envelope.
        has_input: bool,
    },
    /// Execute one call that hands the callee a callback address.
    ///
    /// Followed by one envelope frame carrying `callback_address`.
    Callback,
    /// The caller is going away: drop its pending pipes and registrations.
    Release,
}

/// Callee's answer to a [`Hello`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum HelloAck {
    /// The request was accepted.
    Ready,
    /// The request was refused.
    Error(String),
}
