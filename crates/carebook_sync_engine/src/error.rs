//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for a single remote store call.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors reported by the remote catalog store for a single request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The addressed record (or list) does not exist.
    #[error("not found")]
    NotFound,

    /// The store rejected the payload.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The write conflicts with existing remote state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Network or transport error.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,
}

impl RemoteError {
    /// Returns true for "not found" responses.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound)
    }

    /// Returns true if sending the same request again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Network(_) | RemoteError::Timeout)
    }
}

/// Errors that abort an engine operation as a whole.
///
/// Per-record failures during a save pass are not `SyncError`s; they are
/// collected into the pass outcome instead.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A remote call failed outside of a save pass (e.g. while lazy loading).
    #[error("remote error while {context}: {source}")]
    Remote {
        /// What the engine was doing.
        context: String,
        /// The underlying error.
        #[source]
        source: RemoteError,
    },

    /// Another synchronization pass is still running.
    #[error("a synchronization pass is already in progress")]
    PassInProgress,

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl SyncError {
    /// Wraps a remote error with context.
    pub fn remote(context: impl Into<String>, source: RemoteError) -> Self {
        Self::Remote {
            context: context.into(),
            source,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote { source, .. } => source.is_retryable(),
            SyncError::PassInProgress => true,
            SyncError::InvalidStateTransition { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(RemoteError::Timeout.is_retryable());
        assert!(RemoteError::Network("reset".into()).is_retryable());
        assert!(!RemoteError::Validation("bad".into()).is_retryable());
        assert!(!RemoteError::NotFound.is_retryable());
        assert!(SyncError::remote("loading", RemoteError::Timeout).is_retryable());
        assert!(SyncError::PassInProgress.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::remote("loading scenarios for 10#5", RemoteError::NotFound);
        assert_eq!(
            err.to_string(),
            "remote error while loading scenarios for 10#5: not found"
        );
        assert_eq!(
            RemoteError::Validation("name required".into()).to_string(),
            "validation failed: name required"
        );
    }
}
