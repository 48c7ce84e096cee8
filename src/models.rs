use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Duration;

pub mod auth_session;
pub mod user_session;

pub use auth_session::{AuthSessionRecord, DEFAULT_AUTH_SESSION_TTL_SECS};
pub use user_session::{
    SessionTokens, UserSessionRecord, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MAX_LIFETIME_SECS,
    DEFAULT_REFRESH_SKEW_SECS,
};

/// Longest duration accepted for any TTL (ten years); larger values are clamped
const MAX_TTL_SECS: u64 = 315_360_000;

/// Convert configured seconds into a chrono duration without overflow
pub(crate) fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs.min(MAX_TTL_SECS)).unwrap_or(0))
}

/// Configured seconds as a store TTL, clamped like [`seconds`]
pub(crate) fn ttl(secs: u64) -> std::time::Duration {
    std::time::Duration::from_secs(secs.min(MAX_TTL_SECS))
}

/// Handshake records, keyed by correlation id
pub const AUTH_SESSION_PREFIX: &str = "auth_session:";

/// Authenticated user sessions, keyed by session id
pub const USER_SESSION_PREFIX: &str = "user_session:";

/// Empty marker entries indexing session ids by subject
pub const SUBJECT_INDEX_PREFIX: &str = "subject_sessions:";

#[must_use]
pub fn auth_session_key(correlation_id: &str) -> String {
    format!("{AUTH_SESSION_PREFIX}{correlation_id}")
}

#[must_use]
pub fn user_session_key(session_id: &str) -> String {
    format!("{USER_SESSION_PREFIX}{session_id}")
}

/// Prefix of every index marker for `subject`
///
/// The subject is base64url-encoded so a `:` inside it cannot collide with
/// another subject's prefix.
#[must_use]
pub fn subject_index_prefix(subject: &str) -> String {
    format!("{SUBJECT_INDEX_PREFIX}{}:", URL_SAFE_NO_PAD.encode(subject))
}

#[must_use]
pub fn subject_index_key(subject: &str, session_id: &str) -> String {
    format!("{}{session_id}", subject_index_prefix(subject))
}
