//! Error taxonomy shared by every crate in the workspace.

use thiserror::Error;

/// Classified client error.
///
/// Callers are expected to branch on the variant, not on message text.
/// Every variant still carries a human-readable message with the failing
/// operation and underlying cause.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The credential of record was rejected, or none is configured.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// A token refresh was requested but no refresh token is held.
    #[error("no refresh token available")]
    NoRefreshToken,

    /// Authorization failed and the recovery cycle could not repair it.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The server could not be reached (connection refused, DNS, TLS).
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// A request or wait exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend reported a domain-level failure inside an otherwise
    /// successful response.
    #[error("operation failed: {0}")]
    OperationFailed(String),

    /// The caller violated an input contract (missing field, bad value).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The operation was cancelled before completion.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl ClientError {
    /// Whether this error indicates an authorization problem that the
    /// request executor's recovery cycle may repair.
    #[must_use]
    pub const fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized(_) | Self::InvalidCredentials(_) | Self::NoRefreshToken
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let err = ClientError::Unreachable("login: connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
        assert!(err.to_string().contains("unreachable"));
    }

    #[test]
    fn test_auth_error_classification() {
        assert!(ClientError::NoRefreshToken.is_auth_error());
        assert!(ClientError::Unauthorized(String::new()).is_auth_error());
        assert!(!ClientError::Timeout(String::new()).is_auth_error());
        assert!(!ClientError::OperationFailed(String::new()).is_auth_error());
    }
}
