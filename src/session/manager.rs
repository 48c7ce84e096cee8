//! User Session Manager
//!
//! `UserSessionManager` owns the lifecycle of authenticated sessions stored
//! through a [`SessionStore`]:
//!
//! 1. **Creation** - new random id, fingerprint bound once, TTL = idle timeout
//! 2. **Validation** - fingerprint check, sliding expiry capped at max lifetime
//! 3. **Rotation** - same payload under a new id, old id removed
//! 4. **Token refresh** - access token exchanged through a [`TokenRefresher`]
//! 5. **Termination** - logout of one session or of every session of a subject
//!
//! Writes run on their own task and complete even if the caller goes away;
//! so do whole rotations and token refreshes. Plain reads are cancelled when
//! the caller's future is dropped. Updates of an existing record only land
//! while the record still exists, so a logout or eviction is never undone by
//! a concurrent validation or refresh.
//!
//! Each session also has an empty index marker keyed by subject, which lets
//! [`UserSessionManager::delete_all_for_subject`] find a subject's sessions
//! without decoding anyone else's.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{SessionError, SessionResult};
use crate::fingerprint::ClientFingerprint;
use crate::models::{
    subject_index_key, subject_index_prefix, ttl as ttl_secs, user_session_key, SessionTokens,
    UserSessionRecord, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MAX_LIFETIME_SECS,
    DEFAULT_REFRESH_SKEW_SECS, USER_SESSION_PREFIX,
};
use crate::oauth::TokenRefresher;
use crate::store::{
    detached, detached_write, with_deadline, RecordCodec, RetryPolicy, SessionStore,
};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct UserSessionConfig {
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    pub refresh_skew_secs: u64,
    /// Deadline for each store call
    pub store_timeout: Duration,
    /// Deadline for the refresh-token exchange
    pub token_exchange_timeout: Duration,
    /// Schedule for retrying a failed delete of a rotated-out session
    pub cleanup_retry: RetryPolicy,
}

impl Default for UserSessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            max_lifetime_secs: DEFAULT_MAX_LIFETIME_SECS,
            refresh_skew_secs: DEFAULT_REFRESH_SKEW_SECS,
            store_timeout: Duration::from_secs(5),
            token_exchange_timeout: Duration::from_secs(10),
            cleanup_retry: RetryPolicy::default(),
        }
    }
}

/// First characters of a session id, enough to correlate log lines
fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

// =============================================================================
// Session Manager Structure
// =============================================================================

#[derive(Clone)]
pub struct UserSessionManager {
    store: Arc<dyn SessionStore>,
    codec: RecordCodec,
    refresher: Option<Arc<dyn TokenRefresher>>,
    config: UserSessionConfig,
}

impl std::fmt::Debug for UserSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserSessionManager")
            .field("backend", &self.store.backend_name())
            .field("codec", &self.codec)
            .field("token_refresh", &self.refresher.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl UserSessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, codec: RecordCodec, config: UserSessionConfig) -> Self {
        Self {
            store,
            codec,
            refresher: None,
            config,
        }
    }

    /// Enable [`refresh_access_token`](Self::refresh_access_token)
    #[must_use]
    pub fn with_token_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &UserSessionConfig {
        &self.config
    }

    // =========================================================================
    // Record access
    // =========================================================================

    async fn load(&self, session_id: &str) -> SessionResult<Option<UserSessionRecord>> {
        if session_id.is_empty() {
            return Ok(None);
        }
        let key = user_session_key(session_id);
        let Some(payload) = with_deadline(self.config.store_timeout, self.store.get(&key)).await? else {
            return Ok(None);
        };
        let record: UserSessionRecord = self.codec.decode(&payload).inspect_err(|e| {
            log::error!("Undecodable session record {}: {e}", short_id(session_id));
        })?;
        Ok(Some(record).filter(|r| !r.is_expired()))
    }

    /// Write a brand-new record together with its subject index marker
    async fn persist_new(&self, record: &UserSessionRecord) -> SessionResult<()> {
        let ttl = record.remaining_ttl().ok_or(SessionError::NotFound)?;
        let payload = self.codec.encode(record)?;
        let key = user_session_key(&record.id);
        let marker = subject_index_key(&record.subject, &record.id);
        let marker_ttl = ttl_secs(self.config.max_lifetime_secs);
        let store = Arc::clone(&self.store);
        detached_write(self.config.store_timeout, async move {
            store.set(&marker, &[], marker_ttl).await?;
            store.set(&key, &payload, ttl).await
        })
        .await
    }

    /// Overwrite a live record; `false` if it was deleted meanwhile or has
    /// reached its lifetime cap
    async fn persist_existing(&self, record: &UserSessionRecord) -> SessionResult<bool> {
        let Some(ttl) = record.remaining_ttl() else {
            return Ok(false);
        };
        let payload = self.codec.encode(record)?;
        let key = user_session_key(&record.id);
        let store = Arc::clone(&self.store);
        detached_write(self.config.store_timeout, async move {
            store.set_if_present(&key, &payload, ttl).await
        })
        .await
    }

    async fn remove_keys(&self, keys: Vec<String>) -> SessionResult<()> {
        let store = Arc::clone(&self.store);
        detached_write(self.config.store_timeout, async move {
            for key in &keys {
                store.delete(key).await?;
            }
            Ok(())
        })
        .await
    }

    /// Remove a session and its index marker
    async fn evict(&self, record: &UserSessionRecord) -> SessionResult<()> {
        self.remove_keys(vec![
            user_session_key(&record.id),
            subject_index_key(&record.subject, &record.id),
        ])
        .await
    }

    // =========================================================================
    // 1. Creation
    // =========================================================================

    /// Create a session for an authenticated subject and return its id
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty subject or provider, `Timeout` if
    /// the store does not answer in time, or the store's own error
    pub async fn create(
        &self,
        subject: &str,
        provider: &str,
        fingerprint: ClientFingerprint,
        tokens: SessionTokens,
    ) -> SessionResult<String> {
        if subject.is_empty() || provider.is_empty() {
            return Err(SessionError::InvalidInput(
                "subject and provider must not be empty".to_string(),
            ));
        }

        let record = UserSessionRecord::new(
            subject,
            provider,
            fingerprint,
            tokens,
            self.config.idle_timeout_secs.min(self.config.max_lifetime_secs),
        );
        self.persist_new(&record).await?;

        log::debug!("Created session {} for provider {provider}", short_id(&record.id));
        Ok(record.id)
    }

    // =========================================================================
    // 2. Validation
    // =========================================================================

    /// Check a presented session id and fingerprint
    ///
    /// Returns `None` when the session is unknown, expired, or bound to a
    /// different fingerprint; in the last case the session is deleted. On
    /// success the expiry slides forward and the updated record is returned.
    /// The sliding update never recreates a session deleted concurrently.
    ///
    /// # Errors
    ///
    /// Returns `Timeout`, `Serialization` or a store error; never an error for
    /// an invalid session
    pub async fn validate(
        &self,
        session_id: &str,
        presented: &ClientFingerprint,
    ) -> SessionResult<Option<UserSessionRecord>> {
        let Some(mut record) = self.load(session_id).await? else {
            return Ok(None);
        };

        if !record.fingerprint.matches(presented) {
            log::warn!(
                target: "security",
                "Client fingerprint mismatch for session {} (subject {}), evicting",
                short_id(session_id),
                record.subject
            );
            if let Err(e) = self.evict(&record).await {
                log::error!(
                    target: "security",
                    "Failed to evict session {} after fingerprint mismatch: {e}",
                    short_id(session_id)
                );
            }
            return Ok(None);
        }

        record.touch(self.config.idle_timeout_secs, self.config.max_lifetime_secs);
        if self.persist_existing(&record).await? {
            Ok(Some(record))
        } else {
            log::debug!("Session {} ended during validation", short_id(session_id));
            Ok(None)
        }
    }

    // =========================================================================
    // 3. Rotation
    // =========================================================================

    /// Move a session to a fresh id, returning the new id
    ///
    /// The new record is written before the old one is removed. The whole
    /// rotation runs on its own task, so it completes even if the caller's
    /// future is dropped. If removing the old record fails the new session is
    /// still returned; the removal is retried in the background and the
    /// outcome logged to the `audit` target.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `old_id` is not a live session or is deleted
    /// while the rotation runs, or an error from writing the new record
    pub async fn rotate(&self, old_id: &str) -> SessionResult<String> {
        let this = self.clone();
        let old_id = old_id.to_string();
        detached(async move { this.rotate_to_completion(&old_id).await }).await
    }

    async fn rotate_to_completion(&self, old_id: &str) -> SessionResult<String> {
        let current = self.load(old_id).await?.ok_or(SessionError::NotFound)?;
        let next = current.rotated(self.config.idle_timeout_secs, self.config.max_lifetime_secs);
        self.persist_new(&next).await?;

        let old_key = user_session_key(old_id);
        let old_marker = subject_index_key(&current.subject, old_id);
        match with_deadline(self.config.store_timeout, self.store.take(&old_key)).await {
            Ok(Some(_)) => {
                if let Err(e) = self.remove_keys(vec![old_marker]).await {
                    log::debug!("Stale index marker for {} left to expire: {e}", short_id(old_id));
                }
            }
            Ok(None) => {
                // Logged out or evicted after the load; the new id must not outlive it
                log::warn!(
                    target: "security",
                    "Session {} ended during rotation, discarding {}",
                    short_id(old_id),
                    short_id(&next.id)
                );
                if let Err(e) = self.evict(&next).await {
                    log::error!(
                        target: "audit",
                        "Failed to discard rotated session {}: {e}",
                        short_id(&next.id)
                    );
                }
                return Err(SessionError::NotFound);
            }
            Err(e) => {
                log::warn!(
                    target: "audit",
                    "Rotated session {} -> {} but the old record was not deleted: {e}; retrying",
                    short_id(old_id),
                    short_id(&next.id)
                );
                self.retry_delete_in_background(old_id.to_string(), vec![old_key, old_marker]);
            }
        }

        log::debug!("Rotated session {} -> {}", short_id(old_id), short_id(&next.id));
        Ok(next.id)
    }

    fn retry_delete_in_background(&self, session_id: String, keys: Vec<String>) {
        let store = Arc::clone(&self.store);
        let policy = self.config.cleanup_retry;
        let deadline = self.config.store_timeout;
        tokio::spawn(async move {
            let outcome = policy
                .run("rotated session cleanup", |_: &SessionError| true, || {
                    let store = Arc::clone(&store);
                    let keys = keys.clone();
                    async move {
                        for key in &keys {
                            with_deadline(deadline, store.delete(key)).await?;
                        }
                        Ok(())
                    }
                })
                .await;
            match outcome {
                Ok(()) => log::info!(
                    target: "audit",
                    "Deleted rotated-out session {} on retry",
                    short_id(&session_id)
                ),
                Err(e) => log::error!(
                    target: "audit",
                    "Giving up deleting rotated-out session {}: {e}",
                    short_id(&session_id)
                ),
            }
        });
    }

    // =========================================================================
    // 4. Token refresh
    // =========================================================================

    /// Whether `record`'s access token is within the refresh window
    #[must_use]
    pub fn needs_access_token_refresh(&self, record: &UserSessionRecord) -> bool {
        record.access_token_due_for_refresh(self.config.refresh_skew_secs)
    }

    /// Refresh the session's access token if it is about to expire
    ///
    /// Only the token fields change; the session id and remaining lifetime
    /// are kept. A token that is not yet due is returned unchanged. The
    /// exchange and the write run on their own task, so tokens the provider
    /// has issued are stored even if the caller's future is dropped.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the session is not live or is deleted during the exchange
    /// - `IdentityProvider` if no refresher is configured, the session has no
    ///   refresh token, or the provider rejects the grant
    /// - `Timeout` if the exchange or a store call exceeds its deadline
    pub async fn refresh_access_token(&self, session_id: &str) -> SessionResult<UserSessionRecord> {
        let this = self.clone();
        let session_id = session_id.to_string();
        detached(async move { this.refresh_to_completion(&session_id).await }).await
    }

    async fn refresh_to_completion(&self, session_id: &str) -> SessionResult<UserSessionRecord> {
        let mut record = self.load(session_id).await?.ok_or(SessionError::NotFound)?;
        if !self.needs_access_token_refresh(&record) {
            return Ok(record);
        }

        let refresher = self.refresher.as_ref().ok_or_else(|| {
            SessionError::IdentityProvider("no token refresher configured".to_string())
        })?;
        let refresh_token = record.refresh_token.clone().ok_or_else(|| {
            SessionError::IdentityProvider(format!(
                "provider {} issued no refresh token",
                record.provider
            ))
        })?;

        let refreshed = tokio::time::timeout(
            self.config.token_exchange_timeout,
            refresher.refresh(&record.provider, &refresh_token),
        )
        .await??;

        record.apply_tokens(refreshed.into());
        if !self.persist_existing(&record).await? {
            log::info!(
                "Session {} ended during token refresh, discarding new tokens",
                short_id(session_id)
            );
            return Err(SessionError::NotFound);
        }

        log::debug!("Refreshed access token for session {}", short_id(session_id));
        Ok(record)
    }

    // =========================================================================
    // 5. Termination and enumeration
    // =========================================================================

    /// Log out one session; deleting an unknown id succeeds
    ///
    /// The session's subject index marker is dropped lazily.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` or a store error
    pub async fn delete(&self, session_id: &str) -> SessionResult<()> {
        if session_id.is_empty() {
            return Ok(());
        }
        self.remove_keys(vec![user_session_key(session_id)]).await?;
        log::debug!("Deleted session {}", short_id(session_id));
        Ok(())
    }

    /// Ids of all live sessions
    ///
    /// # Errors
    ///
    /// Returns `Timeout` or a store error
    pub async fn list_session_ids(&self) -> SessionResult<Vec<String>> {
        let keys = with_deadline(
            self.config.store_timeout,
            self.store.list_by_prefix(USER_SESSION_PREFIX),
        )
        .await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(USER_SESSION_PREFIX).map(str::to_string))
            .collect())
    }

    /// Log out every session of `subject`, returning how many were removed
    ///
    /// Walks the subject's index markers only; other subjects' sessions are
    /// never read.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` or a store error; sessions already removed stay removed
    pub async fn delete_all_for_subject(&self, subject: &str) -> SessionResult<usize> {
        let prefix = subject_index_prefix(subject);
        let markers =
            with_deadline(self.config.store_timeout, self.store.list_by_prefix(&prefix)).await?;

        let mut removed = 0;
        for marker in markers {
            let Some(session_id) = marker.strip_prefix(&prefix) else {
                continue;
            };
            let key = user_session_key(session_id);
            let store = Arc::clone(&self.store);
            let was_live = detached_write(self.config.store_timeout, async move {
                let taken = store.take(&key).await?;
                store.delete(&marker).await?;
                Ok(taken.is_some())
            })
            .await?;
            if was_live {
                removed += 1;
            }
        }
        log::info!(target: "audit", "Logged out {removed} session(s) for subject {subject}");
        Ok(removed)
    }
}
