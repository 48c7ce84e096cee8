use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::seconds;
use crate::fingerprint::ClientFingerprint;
use crate::utils::crypto::generate_id;

/// Default idle timeout of an authenticated session (1 hour)
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 3600;

/// Default hard cap on the total life of a session (24 hours)
pub const DEFAULT_MAX_LIFETIME_SECS: u64 = 86_400;

/// Default window before access-token expiry in which a refresh is due
pub const DEFAULT_REFRESH_SKEW_SECS: u64 = 60;

/// Provider tokens handed over after a successful login
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SessionTokens {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: Option<String>,
}

/// One authenticated end-user session
///
/// `fingerprint` is written once at creation and never updated.
/// `expires_at` is the absolute instant the record stops being valid; it only
/// moves forward through a successful validation or a rotation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UserSessionRecord {
    pub id: String,
    pub subject: String,
    pub provider: String,
    pub fingerprint: ClientFingerprint,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: Option<String>,
}

impl UserSessionRecord {
    /// New session with a fresh id, expiring after `idle_timeout_secs`
    #[must_use]
    pub fn new(
        subject: &str,
        provider: &str,
        fingerprint: ClientFingerprint,
        tokens: SessionTokens,
        idle_timeout_secs: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            subject: subject.to_string(),
            provider: provider.to_string(),
            fingerprint,
            created_at: now,
            last_activity_at: now,
            expires_at: now + seconds(idle_timeout_secs),
            access_token: tokens.access_token,
            access_token_expires_at: tokens.access_token_expires_at,
            refresh_token: tokens.refresh_token,
        }
    }

    /// Copy of this session under a new id, with activity and idle expiry reset
    ///
    /// Creation time carries over so the lifetime cap still applies.
    #[must_use]
    pub fn rotated(&self, idle_timeout_secs: u64, max_lifetime_secs: u64) -> Self {
        let mut next = Self {
            id: generate_id(),
            ..self.clone()
        };
        next.touch(idle_timeout_secs, max_lifetime_secs);
        next
    }

    /// Advance last activity and slide the expiry, capped at the lifetime limit
    pub fn touch(&mut self, idle_timeout_secs: u64, max_lifetime_secs: u64) {
        let now = Utc::now();
        let lifetime_cap = self.created_at + seconds(max_lifetime_secs);
        self.last_activity_at = now;
        self.expires_at = std::cmp::min(now + seconds(idle_timeout_secs), lifetime_cap);
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Time left before the record expires, `None` once it has
    #[must_use]
    pub fn remaining_ttl(&self) -> Option<std::time::Duration> {
        (self.expires_at - Utc::now())
            .to_std()
            .ok()
            .filter(|ttl| !ttl.is_zero())
    }

    /// Whether the access token expires within `skew_secs`
    #[must_use]
    pub fn access_token_due_for_refresh(&self, skew_secs: u64) -> bool {
        self.access_token_expires_at <= Utc::now() + seconds(skew_secs)
    }

    pub fn apply_tokens(&mut self, tokens: SessionTokens) {
        self.access_token = tokens.access_token;
        self.access_token_expires_at = tokens.access_token_expires_at;
        if tokens.refresh_token.is_some() {
            self.refresh_token = tokens.refresh_token;
        }
    }

    #[must_use]
    pub fn tokens(&self) -> SessionTokens {
        SessionTokens {
            access_token: self.access_token.clone(),
            access_token_expires_at: self.access_token_expires_at,
            refresh_token: self.refresh_token.clone(),
        }
    }
}
