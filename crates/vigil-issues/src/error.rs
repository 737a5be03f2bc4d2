//! Error types for the vigil-issues crate.

use thiserror::Error;

/// Errors that can occur while tracking issues.
#[derive(Debug, Error)]
pub enum IssueError {
    /// A raw monitoring record could not be turned into an event.
    ///
    /// Such inputs are discarded or quarantined, never retried.
    #[error("malformed input: {reason}")]
    MalformedInput {
        /// What was missing or invalid.
        reason: String,
    },

    /// Issue with the given ID was not found.
    #[error("issue not found: {id}")]
    IssueNotFound {
        /// The issue ID that was not found.
        id: String,
    },

    /// A concurrent mutation of the same signature was detected.
    #[error("store conflict on signature {signature}")]
    StoreConflict {
        /// The contended signature.
        signature: String,
    },

    /// Conflicts persisted after the bounded number of retries.
    #[error("gave up on signature {signature} after {attempts} conflicting attempts")]
    RetriesExhausted {
        /// The contended signature.
        signature: String,
        /// How many attempts were made.
        attempts: u32,
    },

    /// A notification channel rejected or failed a delivery.
    #[error("dispatch to {channel} failed: {reason}")]
    DispatchFailed {
        /// The channel name.
        channel: String,
        /// The reason reported by the channel.
        reason: String,
    },

    /// A notification channel did not answer in time.
    #[error("dispatch to {channel} timed out: {reason}")]
    DispatchTimedOut {
        /// The channel name.
        channel: String,
        /// What timed out.
        reason: String,
    },

    /// Configuration is invalid.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// Reading or writing persisted state failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl IssueError {
    /// Shorthand for a [`IssueError::MalformedInput`].
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            reason: reason.into(),
        }
    }

    /// Returns true if retrying the same operation after re-reading may succeed.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::StoreConflict { .. })
    }
}

impl From<serde_json::Error> for IssueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for IssueError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Result type for issue operations.
pub type Result<T> = std::result::Result<T, IssueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_malformed_input() {
        let err = IssueError::malformed("missing workflow_name");
        assert_eq!(err.to_string(), "malformed input: missing workflow_name");
    }

    #[test]
    fn error_display_issue_not_found() {
        let err = IssueError::IssueNotFound {
            id: "abc-123".to_string(),
        };
        assert_eq!(err.to_string(), "issue not found: abc-123");
    }

    #[test]
    fn error_display_store_conflict() {
        let err = IssueError::StoreConflict {
            signature: "deadbeef".to_string(),
        };
        assert_eq!(err.to_string(), "store conflict on signature deadbeef");
        assert!(err.is_conflict());
    }

    #[test]
    fn error_display_retries_exhausted() {
        let err = IssueError::RetriesExhausted {
            signature: "deadbeef".to_string(),
            attempts: 5,
        };
        assert_eq!(
            err.to_string(),
            "gave up on signature deadbeef after 5 conflicting attempts"
        );
        assert!(!err.is_conflict());
    }

    #[test]
    fn error_display_dispatch_failed() {
        let err = IssueError::DispatchFailed {
            channel: "slack".to_string(),
            reason: "HTTP 500".to_string(),
        };
        assert_eq!(err.to_string(), "dispatch to slack failed: HTTP 500");
    }

    #[test]
    fn error_display_dispatch_timed_out() {
        let err = IssueError::DispatchTimedOut {
            channel: "teams".to_string(),
            reason: "no response after 10s".to_string(),
        };
        assert_eq!(err.to_string(), "dispatch to teams timed out: no response after 10s");
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<String>("invalid json");
        assert!(json_err.is_err());
        let issue_err: IssueError = json_err.unwrap_err().into();
        assert!(matches!(issue_err, IssueError::Serialization(_)));
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let issue_err: IssueError = io_err.into();
        assert!(matches!(issue_err, IssueError::Persistence(_)));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<IssueError>();
    }
}
