//! Error types shared across BLEX crates.

use thiserror::Error;

/// Unified error type for the BLEX library crates.
#[derive(Debug, Error)]
pub enum BlexError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Security error: {0}")]
    Security(String),

    /// Ciphertext was malformed, tampered with, or produced under another key.
    #[error("Invalid token")]
    InvalidToken,

    /// The task queue is not running and cannot accept jobs.
    #[error("Task queue is stopped")]
    QueueStopped,

    /// `stop()` is still running the jobs submitted before it was called.
    #[error("Task queue is still draining")]
    QueueDraining,

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BlexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(BlexError::InvalidToken.to_string(), "Invalid token");
        assert_eq!(BlexError::QueueStopped.to_string(), "Task queue is stopped");
        assert_eq!(
            BlexError::QueueDraining.to_string(),
            "Task queue is still draining"
        );
        assert_eq!(
            BlexError::Runtime("no reactor".into()).to_string(),
            "Runtime error: no reactor"
        );
        assert_eq!(
            BlexError::Config("missing key".into()).to_string(),
            "Configuration error: missing key"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: BlexError = io.into();
        assert!(matches!(err, BlexError::Io(_)));
    }
}
