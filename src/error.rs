//! Error types for tiergate.

use thiserror::Error;

use crate::state::ConnectionStatus;

/// Errors that can occur when using tiergate.
///
/// Tier and admin lookups do not surface these to their callers: the
/// [`TierResolver`](crate::tier::TierResolver) and
/// [`AdminStatusCache`](crate::admin::AdminStatusCache) fold failures into the
/// resolved value. Backend implementations return them so the failure can be
/// logged and recorded.
#[derive(Debug, Error)]
pub enum TierGateError {
    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a wire message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `connect()` was called while the manager already has a session.
    #[error("realtime manager is already active (status: {status})")]
    AlreadyActive {
        /// Status the manager was in when the call was rejected.
        status: ConnectionStatus,
    },

    /// No email was supplied, so the user is unauthenticated and has no tier.
    #[error("no email supplied; user is unauthenticated")]
    MissingEmail,

    /// A backend answered with a non-success HTTP status.
    #[error("backend returned HTTP {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body or client error description.
        message: String,
    },

    /// A backend answered with a payload that does not match its contract.
    #[error("malformed backend response: {0}")]
    MalformedResponse(String),

    /// Configuration values are unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TierGateError {
    /// Returns `true` for failures worth retrying later (network, timeouts,
    /// server-side HTTP errors).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransportSend(_)
            | Self::TransportReceive(_)
            | Self::TransportClosed
            | Self::Timeout
            | Self::Io(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::Serialization(_)
            | Self::AlreadyActive { .. }
            | Self::MissingEmail
            | Self::MalformedResponse(_)
            | Self::InvalidConfig(_) => false,
        }
    }
}

/// A specialized [`Result`] type for tiergate operations.
pub type Result<T> = std::result::Result<T, TierGateError>;

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = TierGateError::Http {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn client_errors_are_not_transient() {
        let err = TierGateError::Http {
            status: 403,
            message: "forbidden".into(),
        };
        assert!(!err.is_transient());
        assert!(!TierGateError::MissingEmail.is_transient());
    }

    #[test]
    fn already_active_names_status() {
        let err = TierGateError::AlreadyActive {
            status: ConnectionStatus::Connected,
        };
        assert_eq!(
            err.to_string(),
            "realtime manager is already active (status: connected)"
        );
    }
}
