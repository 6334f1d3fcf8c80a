//! Error types for core parsing and validation.

use thiserror::Error;

/// Errors raised while interpreting values received from the transport or
/// typed by the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Link-state token not recognised.
    #[error("unknown link state: {0:?}")]
    UnknownLinkState(String),

    /// Session code was empty after trimming.
    #[error("session code cannot be empty")]
    EmptySessionCode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_user_readable() {
        assert_eq!(CoreError::EmptySessionCode.to_string(), "session code cannot be empty");
        assert_eq!(
            CoreError::UnknownLinkState("weird".into()).to_string(),
            "unknown link state: \"weird\""
        );
    }
}
