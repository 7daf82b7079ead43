//! Error types for callwire operations.

use std::io;
use std::path::PathBuf;

use crate::id::{CallerId, RequestId};

/// Alias for `Result<T, callwire::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by transport, pipe and registry plumbing.
///
/// These never cross the call boundary as-is: the executor folds them into
/// [`CallError::Transport`] before a caller sees them.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No pending output pipe for this caller and request id.
    #[error("no pending output pipe {request_id} for caller {caller}")]
    PipeNotFound {
        /// Calling peer.
        caller: CallerId,
        /// Requested pipe.
        request_id: RequestId,
    },

    /// An output pipe with this caller and request id is already pending.
    #[error("output pipe {request_id} for caller {caller} is already pending")]
    PipeInUse {
        /// Calling peer.
        caller: CallerId,
        /// Requested pipe.
        request_id: RequestId,
    },

    /// A callback registration was malformed.
    #[error("invalid callback registration: {0}")]
    InvalidRegistration(String),

    /// No provider is published under this name.
    #[error("provider {0:?} not found")]
    ProviderNotFound(String),

    /// The capability's provider went away.
    #[error("provider disconnected")]
    Disconnected,

    /// The callee refused the connection handshake.
    #[error("refused by callee: {0}")]
    Refused(String),

    /// A callback socket is served by a process other than its registrant.
    #[error("{} is not served by caller {caller}", path.display())]
    ForeignPeer {
        /// Dialed socket.
        path: PathBuf,
        /// Process that registered the socket.
        caller: CallerId,
    },

    /// The callback handle cannot be reached by the remote provider.
    #[error("callback handle has no address reachable by the provider")]
    Unaddressable,

    /// A malformed envelope or record.
    #[error(transparent)]
    Decode(#[from] callwire_proto::DecodeError),

    /// An I/O error from pipes or sockets.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Coarse classification of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The exchange itself failed: pipe, socket, or the peer went away.
    Transport,
    /// The provider reported an error in its result envelope.
    Provider,
    /// The user declined a required interaction.
    UserCancelled,
    /// A callback registration was rejected.
    InvalidRegistration,
    /// The peers do not speak a common protocol version.
    VersionIncompatible,
}

/// A failed call, as seen by the caller.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CallError {
    /// The exchange itself failed.
    #[error("transport failure: {message}")]
    Transport {
        /// What was being attempted.
        message: String,
        /// Underlying I/O failure, when there is one.
        #[source]
        cause: Option<io::Error>,
    },

    /// The provider reported an error.
    #[error("provider error {code}: {message}")]
    Provider {
        /// Provider error id, see [`callwire_proto::ErrorDetails`].
        code: i32,
        /// Provider-supplied description.
        message: String,
    },

    /// The user declined a required interaction.
    #[error("user cancelled the interaction")]
    UserCancelled,

    /// A callback registration was rejected.
    #[error("invalid callback registration: {0}")]
    InvalidRegistration(String),

    /// The peers do not speak a common protocol version.
    #[error("incompatible protocol version: {0}")]
    VersionIncompatible(String),
}

impl CallError {
    /// A transport failure caused by `cause`.
    pub fn transport(message: impl Into<String>, cause: impl Into<Error>) -> Self {
        let cause = match cause.into() {
            Error::Io(e) => e,
            other => io::Error::other(other),
        };
        Self::Transport {
            message: message.into(),
            cause: Some(cause),
        }
    }

    /// A transport failure with no underlying error.
    pub fn transport_msg(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            cause: None,
        }
    }

    /// Coarse classification of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Provider { .. } => ErrorKind::Provider,
            Self::UserCancelled => ErrorKind::UserCancelled,
            Self::InvalidRegistration(_) => ErrorKind::InvalidRegistration,
            Self::VersionIncompatible(_) => ErrorKind::VersionIncompatible,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn transport_keeps_io_cause() {
        let err = CallError::transport("write", io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(err.kind(), ErrorKind::Transport);
        let source = err.source().and_then(|s| s.downcast_ref::<io::Error>());
        assert_eq!(source.map(io::Error::kind), Some(io::ErrorKind::BrokenPipe));
    }

    #[test]
    fn transport_wraps_plumbing_error() {
        let err = CallError::transport("bind", Error::Disconnected);
        assert!(err.to_string().contains("bind"));
        assert!(err.source().is_some());
    }
}
