//! Login handshake coordination
//!
//! A handshake moves through
//! `Initiated -> CallbackReceived -> ConsumedSuccess | ConsumedFailure`.
//! The stored [`AuthSessionRecord`] exists only in `Initiated`: the callback
//! removes it atomically at lookup, so a second delivery of the same callback
//! finds nothing. Handshakes that never see a callback expire with their TTL.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{SessionError, SessionResult};
use crate::models::{auth_session_key, AuthSessionRecord, DEFAULT_AUTH_SESSION_TTL_SECS};
use crate::store::{detached_write, with_deadline, RecordCodec, SessionStore};
use crate::utils::crypto::constant_time_eq;
use crate::utils::redirect::validate_redirect_target;

/// Lifecycle of one login handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Initiated,
    CallbackReceived,
    ConsumedSuccess,
    ConsumedFailure,
}

impl HandshakeState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::ConsumedSuccess | Self::ConsumedFailure)
    }

    /// Whether `next` is a legal successor of `self`
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Initiated, Self::CallbackReceived)
                | (Self::CallbackReceived, Self::ConsumedSuccess | Self::ConsumedFailure)
        )
    }

    fn advance(&mut self, next: Self) {
        debug_assert!(self.can_advance_to(next), "illegal handshake transition {self:?} -> {next:?}");
        log::debug!("Handshake {self:?} -> {next:?}");
        *self = next;
    }
}

#[derive(Debug, Clone)]
pub struct AuthFlowConfig {
    pub handshake_ttl_secs: u64,
    /// Deadline for each store call
    pub store_timeout: Duration,
}

impl Default for AuthFlowConfig {
    fn default() -> Self {
        Self {
            handshake_ttl_secs: DEFAULT_AUTH_SESSION_TTL_SECS,
            store_timeout: Duration::from_secs(5),
        }
    }
}

/// What the caller needs to build the provider's authorization URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFlowStart {
    pub correlation_id: String,
    /// CSRF `state` parameter
    pub state: String,
    /// OIDC `nonce` parameter
    pub nonce: String,
    /// PKCE S256 challenge
    pub code_challenge: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of a successfully validated callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackOutcome {
    pub provider: String,
    /// Expected `nonce` claim of the ID token
    pub nonce: String,
    pub redirect_url: Option<String>,
    /// PKCE verifier to present on the code exchange
    pub code_verifier: String,
    /// Terminal state the handshake reached
    pub state: HandshakeState,
}

/// Creates and consumes handshake records
#[derive(Clone)]
pub struct AuthFlowCoordinator {
    store: Arc<dyn SessionStore>,
    codec: RecordCodec,
    config: AuthFlowConfig,
}

impl std::fmt::Debug for AuthFlowCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthFlowCoordinator")
            .field("backend", &self.store.backend_name())
            .field("codec", &self.codec)
            .field("config", &self.config)
            .finish()
    }
}

impl AuthFlowCoordinator {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, codec: RecordCodec, config: AuthFlowConfig) -> Self {
        Self {
            store,
            codec,
            config,
        }
    }

    /// Start a handshake for `provider`
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty provider, `Timeout` if the store
    /// does not answer in time, or the store's own error
    pub async fn initiate(&self, provider: &str) -> SessionResult<AuthFlowStart> {
        self.start(provider, None).await
    }

    /// Start a handshake that remembers where to send the user afterwards
    ///
    /// Only relative paths are accepted as redirect targets.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty provider or an unsafe redirect, plus
    /// the errors of [`initiate`](Self::initiate)
    pub async fn initiate_with_redirect(
        &self,
        provider: &str,
        redirect_url: &str,
    ) -> SessionResult<AuthFlowStart> {
        let redirect = validate_redirect_target(redirect_url)?;
        self.start(provider, Some(redirect)).await
    }

    async fn start(&self, provider: &str, redirect_url: Option<String>) -> SessionResult<AuthFlowStart> {
        if provider.trim().is_empty() {
            return Err(SessionError::InvalidInput("provider must not be empty".to_string()));
        }

        let record = AuthSessionRecord::new(provider, redirect_url, self.config.handshake_ttl_secs);
        let payload = self.codec.encode(&record)?;
        let key = auth_session_key(&record.id);
        let ttl = record.ttl();

        let store = Arc::clone(&self.store);
        detached_write(self.config.store_timeout, async move {
            store.set(&key, &payload, ttl).await
        })
        .await?;

        log::debug!("Login handshake initiated for provider {provider}");

        Ok(AuthFlowStart {
            code_challenge: record.code_challenge(),
            expires_at: record.expires_at(),
            correlation_id: record.id,
            state: record.state,
            nonce: record.nonce,
        })
    }

    /// Consume the handshake identified by `correlation_id`
    ///
    /// The record is removed at lookup whatever the outcome, so this succeeds
    /// at most once per handshake.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the handshake is unknown, expired or already consumed
    /// - `CsrfViolation` if `received_state` does not match
    /// - `Timeout`, `Serialization` or a store error otherwise
    pub async fn validate_callback(
        &self,
        correlation_id: &str,
        received_state: &str,
    ) -> SessionResult<CallbackOutcome> {
        if correlation_id.is_empty() {
            log::warn!(target: "security", "Login callback without correlation id");
            return Err(SessionError::NotFound);
        }

        let key = auth_session_key(correlation_id);
        let Some(payload) = with_deadline(self.config.store_timeout, self.store.take(&key)).await? else {
            log::warn!(target: "security", "Login callback for unknown, expired or consumed handshake");
            return Err(SessionError::NotFound);
        };

        let mut state = HandshakeState::Initiated;
        state.advance(HandshakeState::CallbackReceived);

        let record: AuthSessionRecord = self.codec.decode(&payload).inspect_err(|e| {
            log::error!("Discarding undecodable handshake record: {e}");
        })?;

        if record.is_expired() {
            state.advance(HandshakeState::ConsumedFailure);
            log::info!(
                target: "security",
                "Login callback for provider {} arrived after expiry (handshake {state:?})",
                record.provider
            );
            return Err(SessionError::NotFound);
        }

        if !constant_time_eq(record.state.as_bytes(), received_state.as_bytes()) {
            state.advance(HandshakeState::ConsumedFailure);
            log::warn!(
                target: "security",
                "CSRF state mismatch on login callback for provider {} (handshake {state:?})",
                record.provider
            );
            return Err(SessionError::CsrfViolation);
        }

        state.advance(HandshakeState::ConsumedSuccess);
        log::info!(
            target: "audit",
            "Login callback accepted for provider {} (handshake {state:?})",
            record.provider
        );
        Ok(CallbackOutcome {
            provider: record.provider,
            nonce: record.nonce,
            redirect_url: record.redirect_url,
            code_verifier: record.code_verifier,
            state,
        })
    }
}
