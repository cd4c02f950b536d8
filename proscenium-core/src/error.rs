use thiserror::Error;

/// Why an operation's payload could not be handled.
///
/// These never escape [`Document::apply_operation`](crate::Document::apply_operation);
/// they are recorded as [`ApplyOutcome::Faulted`](crate::ApplyOutcome::Faulted)
/// so one malformed operation cannot destabilize a room.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("malformed `{kind}` payload: {message}")]
    MalformedPayload { kind: String, message: String },

    #[error("`{kind}` payload has invalid `{field}`: {reason}")]
    InvalidField {
        kind: String,
        field: &'static str,
        reason: String,
    },
}

impl OperationError {
    pub(crate) fn malformed(kind: &str, err: serde_json::Error) -> Self {
        Self::MalformedPayload {
            kind: kind.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn invalid(kind: &str, field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            kind: kind.to_string(),
            field,
            reason: reason.into(),
        }
    }
}
