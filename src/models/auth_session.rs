use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{seconds, ttl};
use crate::utils::crypto::{
    code_challenge, generate_code_verifier, generate_csrf_token, generate_id, generate_nonce,
};

/// Default lifetime of a login handshake (10 minutes)
pub const DEFAULT_AUTH_SESSION_TTL_SECS: u64 = 600;

/// Correlation state for one in-progress third-party login
///
/// Single-use: the coordinator removes it at the first callback lookup,
/// whatever the outcome.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AuthSessionRecord {
    pub id: String,
    pub provider: String,
    pub state: String,
    pub nonce: String,
    pub code_verifier: String,
    pub redirect_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl AuthSessionRecord {
    /// Fresh handshake record with newly generated id, state, nonce and PKCE verifier
    #[must_use]
    pub fn new(provider: &str, redirect_url: Option<String>, ttl_seconds: u64) -> Self {
        Self {
            id: generate_id(),
            provider: provider.to_string(),
            state: generate_csrf_token(),
            nonce: generate_nonce(),
            code_verifier: generate_code_verifier(),
            redirect_url,
            created_at: Utc::now(),
            ttl_seconds,
        }
    }

    /// S256 PKCE challenge to send on the authorization request
    #[must_use]
    pub fn code_challenge(&self) -> String {
        code_challenge(&self.code_verifier)
    }

    /// Store TTL for this record, clamped to a sane maximum
    #[must_use]
    pub fn ttl(&self) -> std::time::Duration {
        ttl(self.ttl_seconds)
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + seconds(self.ttl_seconds)
    }

    /// Guards against a backend whose expiry lags the record's own clock
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at() <= Utc::now()
    }
}
