//! Error types for queue management

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Queue engine errors
///
/// None of these are fatal: a failed command leaves the engine exactly as it
/// was before the command ran.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Index argument outside the queue
    #[error("Invalid index {index} (queue length {len})")]
    InvalidIndex { index: usize, len: usize },

    /// Operation needs a current track but no queue is loaded
    #[error("Queue is empty")]
    EmptyQueue,

    /// Restored snapshot referenced tracks the library no longer knows
    ///
    /// Only published as a failure signal: restore keeps what it can.
    #[error("Snapshot referenced {} unknown track(s)", dropped.len())]
    InconsistentSnapshot { dropped: Vec<String> },

    /// Persisted snapshot could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Command sent after the engine was shut down
    #[error("Queue engine is not running")]
    EngineStopped,

    /// Worker thread could not be started
    #[error("Failed to start worker: {0}")]
    Worker(String),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),
}

impl QueueError {
    /// Kind tag used when the error is published to observers
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::InvalidIndex { .. } => ErrorKind::InvalidIndex,
            QueueError::EmptyQueue => ErrorKind::EmptyQueue,
            QueueError::InconsistentSnapshot { .. } => ErrorKind::InconsistentSnapshot,
            QueueError::Serialization(_) => ErrorKind::Serialization,
            QueueError::EngineStopped => ErrorKind::EngineStopped,
            QueueError::Worker(_) => ErrorKind::Worker,
            QueueError::Config(_) => ErrorKind::Config,
        }
    }
}

/// Error kind carried by failure signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidIndex,
    EmptyQueue,
    InconsistentSnapshot,
    Serialization,
    EngineStopped,
    Worker,
    Config,
}

/// Result type for queue operations
pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages() {
        let err = QueueError::InvalidIndex { index: 7, len: 3 };
        assert_eq!(err.to_string(), "Invalid index 7 (queue length 3)");

        let err = QueueError::InconsistentSnapshot {
            dropped: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "Snapshot referenced 2 unknown track(s)");
    }

    #[test]
    fn kind_matches_variant() {
        assert_eq!(QueueError::EmptyQueue.kind(), ErrorKind::EmptyQueue);
        assert_eq!(
            QueueError::InvalidIndex { index: 0, len: 0 }.kind(),
            ErrorKind::InvalidIndex
        );
        assert_eq!(QueueError::EngineStopped.kind(), ErrorKind::EngineStopped);
    }
}
