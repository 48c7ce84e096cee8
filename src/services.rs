//! Start-up wiring
//!
//! [`SessionServices`] builds the one [`SessionStore`] chosen in settings and
//! hands the same instance to the handshake coordinator and the session
//! manager. It owns shutdown through [`SessionServices::close`].

use std::sync::Arc;
use std::time::Duration;

use crate::auth_flow::{AuthFlowConfig, AuthFlowCoordinator};
use crate::error::SessionResult;
use crate::fingerprint::Fingerprinter;
use crate::oauth::HttpTokenRefresher;
use crate::session::{UserSessionConfig, UserSessionManager};
use crate::settings::{Settings, StoreBackend, StoreSettings};
use crate::store::{InProcessSessionStore, NetworkedSessionStore, RecordCodec, SessionStore};

/// Build the configured store backend
///
/// # Errors
///
/// Returns an error if the Redis backend is selected and cannot be reached.
/// There is no silent fallback to the in-process store.
pub async fn build_store(settings: &StoreSettings) -> SessionResult<Arc<dyn SessionStore>> {
    let store: Arc<dyn SessionStore> = match settings.backend {
        StoreBackend::Redis => Arc::new(NetworkedSessionStore::connect(settings.redis.clone()).await?),
        StoreBackend::Memory => {
            let store = InProcessSessionStore::new();
            if settings.sweep_interval_secs > 0 {
                store.spawn_sweeper(Duration::from_secs(settings.sweep_interval_secs));
            }
            log::info!("Using in-process session store; sessions are lost on restart");
            Arc::new(store)
        }
    };
    Ok(store)
}

fn codec_for(settings: &StoreSettings) -> RecordCodec {
    if settings.payload_secret.is_empty() {
        RecordCodec::plain()
    } else {
        RecordCodec::sealed(settings.payload_secret.as_bytes())
    }
}

/// Everything an HTTP layer needs to run logins and sessions
#[derive(Debug, Clone)]
pub struct SessionServices {
    store: Arc<dyn SessionStore>,
    fingerprinter: Fingerprinter,
    auth_flow: AuthFlowCoordinator,
    sessions: UserSessionManager,
}

impl SessionServices {
    /// Build the store named in `settings` and wire every component to it
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be built or a provider's token
    /// endpoint is misconfigured
    pub async fn from_settings(settings: &Settings) -> SessionResult<Self> {
        let store = build_store(&settings.store).await?;
        Self::with_store(store, settings)
    }

    /// Wire every component to an already built store
    ///
    /// # Errors
    ///
    /// Returns an error if a provider's token endpoint is misconfigured
    pub fn with_store(store: Arc<dyn SessionStore>, settings: &Settings) -> SessionResult<Self> {
        let codec = codec_for(&settings.store);
        let store_timeout = Duration::from_millis(settings.store.store_timeout_ms);

        let auth_flow = AuthFlowCoordinator::new(
            Arc::clone(&store),
            codec.clone(),
            AuthFlowConfig {
                handshake_ttl_secs: settings.handshake.ttl_secs,
                store_timeout,
            },
        );

        let mut sessions = UserSessionManager::new(
            Arc::clone(&store),
            codec,
            UserSessionConfig {
                idle_timeout_secs: settings.session.idle_timeout_secs,
                max_lifetime_secs: settings.session.max_lifetime_secs,
                refresh_skew_secs: settings.session.refresh_skew_secs,
                store_timeout,
                token_exchange_timeout: Duration::from_secs(settings.session.token_exchange_timeout_secs),
                cleanup_retry: settings.store.redis.retry,
            },
        );

        let refresher = HttpTokenRefresher::from_settings(settings)?;
        if refresher.providers().next().is_some() {
            sessions = sessions.with_token_refresher(Arc::new(refresher));
        }

        let fingerprinter = Fingerprinter::new(
            settings.fingerprint.secret.as_bytes(),
            settings.fingerprint.policy(),
        );

        log::info!(
            "Session services ready (backend: {}, payload sealing: {})",
            store.backend_name(),
            if settings.store.payload_secret.is_empty() { "off" } else { "on" }
        );

        Ok(Self {
            store,
            fingerprinter,
            auth_flow,
            sessions,
        })
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    #[must_use]
    pub const fn fingerprinter(&self) -> &Fingerprinter {
        &self.fingerprinter
    }

    #[must_use]
    pub const fn auth_flow(&self) -> &AuthFlowCoordinator {
        &self.auth_flow
    }

    #[must_use]
    pub const fn sessions(&self) -> &UserSessionManager {
        &self.sessions
    }

    /// Liveness of the backing store
    pub async fn health_check(&self) -> bool {
        self.store.health_check().await
    }

    /// Stop background tasks and release the store
    pub async fn close(&self) {
        self.store.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::ClientSignals;
    use crate::models::SessionTokens;
    use chrono::Utc;

    fn memory_settings() -> Settings {
        let mut settings = Settings::default();
        settings.store.backend = StoreBackend::Memory;
        settings.store.sweep_interval_secs = 0;
        settings.fingerprint.secret = "test-fingerprint-secret".to_string();
        settings
    }

    #[tokio::test]
    async fn test_memory_backend_wiring() {
        let services = SessionServices::from_settings(&memory_settings()).await.unwrap();
        assert_eq!(services.store().backend_name(), "memory");
        assert!(services.health_check().await);

        let fingerprint = services
            .fingerprinter()
            .fingerprint(&ClientSignals::new().with_user_agent("curl/8.0"));
        let id = services
            .sessions()
            .create(
                "u1",
                "google",
                fingerprint.clone(),
                SessionTokens {
                    access_token: "a".to_string(),
                    access_token_expires_at: Utc::now() + chrono::Duration::hours(1),
                    refresh_token: None,
                },
            )
            .await
            .unwrap();
        assert!(services.sessions().validate(&id, &fingerprint).await.unwrap().is_some());

        services.close().await;
        assert!(services.sessions().validate(&id, &fingerprint).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sealed_payloads_when_secret_configured() {
        let mut settings = memory_settings();
        settings.store.payload_secret = "payload-secret".to_string();
        let services = SessionServices::from_settings(&settings).await.unwrap();

        let start = services.auth_flow().initiate("google").await.unwrap();
        let key = crate::models::auth_session_key(&start.correlation_id);
        let payload = services.store().get(&key).await.unwrap().unwrap();
        assert!(serde_json::from_slice::<serde_json::Value>(&payload).is_err());
    }
}
