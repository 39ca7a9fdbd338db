//! Error types for dialogue-core
//!
//! Protocol errors (a message that does not belong to a dialogue or breaks the
//! reply graph) are reported as [`DialogueError::InvalidMessage`] and are
//! expected during normal operation: callers drop the message and carry on.
//!
//! Contract violations (re-completing a label, replying in an empty dialogue,
//! feeding `update` a message that is not addressed to us, ...) are not
//! represented here. They panic, because they mean the caller broke the
//! engine's own invariants.

use thiserror::Error;

/// Result type for dialogue operations
pub type DialogueResult<T> = Result<T, DialogueError>;

/// Errors that can occur while managing dialogues
#[derive(Debug, Error)]
pub enum DialogueError {
    /// The message does not belong to the dialogue or fails validation
    #[error("Invalid dialogue message: {reason}")]
    InvalidMessage { reason: String },

    /// A reply referenced a message id that is not part of the dialogue
    #[error("Target message {target} not found in dialogue")]
    TargetNotFound { target: i64 },

    /// Invalid configuration or missing collaborators
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The backing key-value store failed
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// A persisted record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted record has the wrong shape
    #[error("Invalid dialogue record: {message}")]
    InvalidRecord { message: String },
}

impl DialogueError {
    /// Create an invalid message error
    pub fn invalid_message(reason: impl Into<String>) -> Self {
        Self::InvalidMessage {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create an invalid record error
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    /// Whether this error is an expected protocol error rather than an
    /// infrastructure failure
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::InvalidMessage { .. } | Self::TargetNotFound { .. })
    }
}

impl From<std::io::Error> for DialogueError {
    fn from(error: std::io::Error) -> Self {
        DialogueError::Storage {
            message: format!("I/O error: {}", error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DialogueError::invalid_message("Invalid target. Expected 0. Found 3.");
        assert_eq!(
            format!("{}", error),
            "Invalid dialogue message: Invalid target. Expected 0. Found 3."
        );

        let error = DialogueError::TargetNotFound { target: -4 };
        assert_eq!(format!("{}", error), "Target message -4 not found in dialogue");
    }

    #[test]
    fn test_protocol_error_classification() {
        assert!(DialogueError::invalid_message("bad").is_protocol_error());
        assert!(DialogueError::TargetNotFound { target: 2 }.is_protocol_error());
        assert!(!DialogueError::storage("disk full").is_protocol_error());
        assert!(!DialogueError::configuration("no address").is_protocol_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let error: DialogueError = io_error.into();

        match error {
            DialogueError::Storage { message } => assert!(message.contains("read-only")),
            _ => panic!("Expected storage error"),
        }
    }
}
