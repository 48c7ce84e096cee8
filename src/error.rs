//! Session error taxonomy
//!
//! Every fallible operation in this crate returns [`SessionError`]. The three
//! authentication failures (`NotFound`, `CsrfViolation`, `FingerprintMismatch`)
//! share one display string so that nothing rendered to an end user can tell
//! them apart; the precise reason is written to the `security` log target.

use thiserror::Error;

/// Generic message shown for every authentication failure
pub const AUTHENTICATION_REQUIRED: &str = "authentication required";

/// Errors produced by session stores, the auth flow coordinator and the
/// user session manager
#[derive(Debug, Error)]
pub enum SessionError {
    /// Record is absent or expired
    #[error("authentication required")]
    NotFound,

    /// Callback state did not match the stored CSRF token
    #[error("authentication required")]
    CsrfViolation,

    /// Presented client fingerprint did not match the bound one
    #[error("authentication required")]
    FingerprintMismatch,

    /// Store or identity provider call exceeded its deadline
    #[error("operation timed out")]
    Timeout,

    /// Networked store could not be reached after retries
    #[error("session backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Stored payload could not be encoded or decoded
    #[error("session record serialization failed: {0}")]
    Serialization(String),

    /// Non-retryable protocol or authorization error from the backend
    #[error("session backend error: {0}")]
    Backend(String),

    /// Refresh-token exchange with the identity provider failed
    #[error("identity provider error: {0}")]
    IdentityProvider(String),

    /// Caller supplied a value the crate refuses to store
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl SessionError {
    /// Security-relevant failures: never retried, always audited
    #[must_use]
    pub const fn is_security_event(&self) -> bool {
        matches!(self, Self::CsrfViolation | Self::FingerprintMismatch)
    }

    /// Failures where retrying the whole operation later may succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::BackendUnavailable(_))
    }

    /// Whether the caller should send the user back through login
    #[must_use]
    pub const fn requires_authentication(&self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::CsrfViolation | Self::FingerprintMismatch
        )
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for SessionError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

/// Result alias used throughout the crate
pub type SessionResult<T> = Result<T, SessionError>;
