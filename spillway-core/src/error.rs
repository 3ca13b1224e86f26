//! Error types for spillway operations

use thiserror::Error;

/// Persistent-backend errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Connection failed: {reason}")]
    Connection { reason: String },

    #[error("Query failed: {reason}")]
    Query { reason: String },

    #[error("Timed out during {operation} after {waited_ms}ms")]
    Timeout { operation: String, waited_ms: u64 },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Operation not supported: {operation}")]
    Unsupported { operation: String },

    #[error("Backend has been disposed")]
    Disposed,
}

impl BackendError {
    /// Transient errors are logged and the offending event dropped; the
    /// write queue keeps running. Non-transient errors destroy the queue.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::Connection { .. }
                | BackendError::Query { .. }
                | BackendError::Timeout { .. }
        )
    }
}

/// Entry codec errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Encoding failed: {reason}")]
    Encode { reason: String },

    #[error("Decoding failed: {reason}")]
    Decode { reason: String },
}

impl From<CodecError> for BackendError {
    fn from(e: CodecError) -> Self {
        BackendError::Serialization {
            reason: e.to_string(),
        }
    }
}

/// Event-queue errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Event queue full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("Event queue has been destroyed")]
    Destroyed,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all spillway errors.
#[derive(Debug, Clone, Error)]
pub enum SpillwayError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid entry: {reason}")]
    InvalidEntry { reason: String },
}

/// Result type alias for spillway operations.
pub type SpillwayResult<T> = Result<T, SpillwayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BackendError::Connection {
            reason: "refused".to_string()
        }
        .is_transient());
        assert!(BackendError::Query {
            reason: "deadlock".to_string()
        }
        .is_transient());
        assert!(!BackendError::Disposed.is_transient());
        assert!(!BackendError::Serialization {
            reason: "bad payload".to_string()
        }
        .is_transient());
        assert!(!BackendError::Unsupported {
            operation: "group_keys".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_master_error_from_conversions() {
        let err: SpillwayError = QueueError::Destroyed.into();
        assert!(matches!(err, SpillwayError::Queue(QueueError::Destroyed)));

        let err: SpillwayError = BackendError::Disposed.into();
        assert!(matches!(err, SpillwayError::Backend(BackendError::Disposed)));
    }
}
