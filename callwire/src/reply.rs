//! Result-envelope builders for providers.

use callwire_proto::{Envelope, ErrorDetails, Fields, ResumeToken, result};

/// A successful result carrying `fields`.
pub fn success(fields: Fields) -> Envelope {
    let mut env = Envelope::result();
    env.merge(fields);
    env.insert(result::CODE, result::CODE_SUCCESS);
    env
}

/// An error result.
pub fn error(error_id: i32, message: impl Into<String>) -> Envelope {
    Envelope::result()
        .with(result::CODE, result::CODE_ERROR)
        .with(result::ERROR, ErrorDetails::new(error_id, message).to_value())
}

/// A result pausing the call until the user resolves `token`.
pub fn interaction_required(token: ResumeToken) -> Envelope {
    Envelope::result()
        .with(result::CODE, result::CODE_USER_INTERACTION_REQUIRED)
        .with(result::INTENT, token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_code_wins_over_payload() {
        let mut fields = Fields::new();
        fields.insert(result::CODE.to_owned(), result::CODE_ERROR.into());
        fields.insert("n".to_owned(), 3.into());

        let env = success(fields);
        assert_eq!(env.get_int(result::CODE), Some(result::CODE_SUCCESS));
        assert_eq!(env.get_int("n"), Some(3));
    }

    #[test]
    fn error_carries_details() {
        let env = error(ErrorDetails::NO_OR_WRONG_ACCOUNT, "who?");
        let details = env.get(result::ERROR).and_then(ErrorDetails::from_value);
        assert_eq!(
            details,
            Some(ErrorDetails::new(ErrorDetails::NO_OR_WRONG_ACCOUNT, "who?"))
        );
    }
}
