//! Error types for TierSearch
//!
//! `Error` covers failures that are fatal to one request (a load, a resume,
//! a misconfigured search). `ProviderError` is isolated to a single provider
//! call and never aborts orchestration.

use crate::state::SessionStatus;
use serde::{Deserialize, Serialize};

/// Crate-level error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No persisted session with this id
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The session exists but the requested checkpoint does not
    #[error("checkpoint not found: {session_id}/{checkpoint_id}")]
    CheckpointNotFound {
        session_id: String,
        checkpoint_id: String,
    },

    /// A checkpoint artifact could not be decoded. Other checkpoints of the
    /// same session are unaffected.
    #[error("checkpoint {checkpoint_id} of session {session_id} is corrupt: {reason}")]
    CheckpointCorrupt {
        session_id: String,
        checkpoint_id: String,
        reason: String,
    },

    /// Invalid settings or an unknown provider referenced by a caller
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A required overlay network is unreachable
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// Illegal session state machine transition
    #[error("invalid session transition from {from} to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single provider call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP error: {0}")]
    Http(u16),
    #[error("failed to parse response: {0}")]
    Parse(String),
    #[error("access denied")]
    AccessDenied,
    #[error("CAPTCHA required")]
    Captcha,
    #[error("too many requests")]
    TooManyRequests,
    #[error("required network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Map an HTTP status code to the matching provider error
    pub fn from_status(status: u16) -> Self {
        match status {
            403 => Self::AccessDenied,
            429 => Self::TooManyRequests,
            code => Self::Http(code),
        }
    }

    /// Whether this error came from the tier deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16())
        } else if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_checkpoint_corrupt() {
        let err = Error::CheckpointCorrupt {
            session_id: "s1".into(),
            checkpoint_id: "c1".into(),
            reason: "bad gzip header".into(),
        };
        assert_eq!(
            err.to_string(),
            "checkpoint c1 of session s1 is corrupt: bad gzip header"
        );
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ProviderError::from_status(429), ProviderError::TooManyRequests);
        assert_eq!(ProviderError::from_status(403), ProviderError::AccessDenied);
        assert_eq!(ProviderError::from_status(502), ProviderError::Http(502));
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
        assert_send_sync::<ProviderError>();
    }
}
