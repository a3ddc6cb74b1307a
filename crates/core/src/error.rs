//! Shared error type for identifiers and record lifecycles.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic failures that no retry can fix.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier did not parse.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A status change that would move a record backwards or out of a
    /// terminal state.
    #[error("{record} cannot move from {from} to {to}")]
    InvalidTransition {
        record: String,
        from: &'static str,
        to: &'static str,
    },
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn transition(record: impl Into<String>, from: &'static str, to: &'static str) -> Self {
        Self::InvalidTransition {
            record: record.into(),
            from,
            to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_message_names_the_record() {
        let err = DomainError::transition("job 42", "completed", "processing");
        assert_eq!(err.to_string(), "job 42 cannot move from completed to processing");
    }
}
