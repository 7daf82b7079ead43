//! Caller-side view of a finished call.

use callwire_proto::{Envelope, ErrorDetails, Fields, ResumeToken, result};
use tokio::task::JoinError;

use crate::error::CallError;

/// How a call ended.
#[derive(Debug)]
#[non_exhaustive]
pub enum CallOutcome {
    /// The provider succeeded. Fields come from the result envelope.
    Success(Fields),
    /// The call failed.
    Error(CallError),
    /// The provider needs the user before it can proceed.
    InteractionRequired(ResumeToken),
}

impl CallOutcome {
    /// Interprets a provider's result envelope.
    ///
    /// A missing or unknown result code means the peers disagree about the
    /// protocol and yields [`CallError::VersionIncompatible`].
    pub fn from_result(envelope: Envelope) -> Self {
        match envelope.get_int(result::CODE) {
            Some(result::CODE_SUCCESS) => {
                let mut fields = envelope.into_fields();
                for key in [result::CODE, result::ERROR, result::INTENT] {
                    fields.remove(key);
                }
                Self::Success(fields)
            }
            Some(result::CODE_USER_INTERACTION_REQUIRED) => {
                match envelope.get_token(result::INTENT) {
                    Some(token) => Self::InteractionRequired(token.clone()),
                    None => Self::Error(CallError::VersionIncompatible(
                        "interaction required without a resume token".to_owned(),
                    )),
                }
            }
            Some(result::CODE_ERROR) => {
                let details = envelope
                    .get(result::ERROR)
                    .and_then(ErrorDetails::from_value)
                    .unwrap_or_else(|| {
                        ErrorDetails::new(ErrorDetails::GENERIC_ERROR, "no error details")
                    });
                Self::Error(match details.error_id {
                    ErrorDetails::INCOMPATIBLE_API_VERSIONS => {
                        CallError::VersionIncompatible(details.message)
                    }
                    ErrorDetails::INVALID_REGISTRATION => {
                        CallError::InvalidRegistration(details.message)
                    }
                    code => CallError::Provider {
                        code,
                        message: details.message,
                    },
                })
            }
            Some(code) => Self::Error(CallError::VersionIncompatible(format!(
                "unknown result code {code}"
            ))),
            None => Self::Error(CallError::VersionIncompatible(
                "result envelope has no result code".to_owned(),
            )),
        }
    }

    /// Collapses a detached call's join result.
    pub fn from_join(joined: Result<Self, JoinError>) -> Self {
        joined.unwrap_or_else(|e| {
            Self::Error(CallError::transport_msg(format!("call task failed: {e}")))
        })
    }

    /// Whether this is [`CallOutcome::Success`].
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The success fields, if any.
    pub const fn fields(&self) -> Option<&Fields> {
        match self {
            Self::Success(fields) => Some(fields),
            _ => None,
        }
    }

    /// The error, if any.
    pub const fn error(&self) -> Option<&CallError> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }
}
