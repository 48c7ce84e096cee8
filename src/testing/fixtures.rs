//! Test fixtures providing pre-built test objects
//!
//! Everything here runs on the in-process store with plain payloads unless a
//! store is passed in, so tests need no external services.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::auth_flow::{AuthFlowConfig, AuthFlowCoordinator};
use crate::fingerprint::{ClientFingerprint, ClientSignals, FingerprintPolicy, Fingerprinter};
use crate::models::SessionTokens;
use crate::session::{UserSessionConfig, UserSessionManager};
use crate::settings::{Settings, StoreBackend};
use crate::store::{InProcessSessionStore, RecordCodec, RetryPolicy, SessionStore};

use super::constants::{TEST_CLIENT_IP, TEST_FINGERPRINT_KEY, TEST_LANGUAGE, TEST_USER_AGENT};

/// Central fixture provider for all test data
pub struct TestFixtures;

impl TestFixtures {
    #[must_use]
    pub fn memory_store() -> Arc<dyn SessionStore> {
        Arc::new(InProcessSessionStore::new())
    }

    #[must_use]
    pub fn auth_flow(store: Arc<dyn SessionStore>) -> AuthFlowCoordinator {
        AuthFlowCoordinator::new(store, RecordCodec::plain(), AuthFlowConfig::default())
    }

    #[must_use]
    pub fn session_manager(store: Arc<dyn SessionStore>) -> UserSessionManager {
        UserSessionManager::new(store, RecordCodec::plain(), Self::session_config())
    }

    /// Default session config with a fast cleanup retry schedule
    #[must_use]
    pub fn session_config() -> UserSessionConfig {
        UserSessionConfig {
            cleanup_retry: RetryPolicy {
                base_delay_ms: 10,
                max_delay_ms: 50,
                max_attempts: 3,
            },
            store_timeout: Duration::from_secs(1),
            ..UserSessionConfig::default()
        }
    }

    /// Settings for the in-process backend with a fixed fingerprint secret
    #[must_use]
    pub fn memory_settings() -> Settings {
        let mut settings = Settings::default();
        settings.store.backend = StoreBackend::Memory;
        settings.store.sweep_interval_secs = 0;
        settings.fingerprint.secret = String::from_utf8_lossy(TEST_FINGERPRINT_KEY).into_owned();
        settings
    }

    #[must_use]
    pub fn fingerprinter() -> Fingerprinter {
        Fingerprinter::new(TEST_FINGERPRINT_KEY, FingerprintPolicy::default())
    }

    /// Signals of a typical desktop browser
    #[must_use]
    pub fn browser_signals() -> ClientSignals {
        ClientSignals::new()
            .with_user_agent(TEST_USER_AGENT)
            .with_accept_language(TEST_LANGUAGE)
            .with_platform("\"macOS\"")
            .with_transport("TLSv1.3", "h2")
            .with_client_ip(TEST_CLIENT_IP)
    }

    /// Signals of a different device
    #[must_use]
    pub fn other_device_signals() -> ClientSignals {
        ClientSignals::new()
            .with_user_agent("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)")
            .with_accept_language("fr-FR")
            .with_transport("TLSv1.2", "http/1.1")
            .with_client_ip("10.0.0.7")
    }

    #[must_use]
    pub fn fingerprint() -> ClientFingerprint {
        Self::fingerprinter().fingerprint(&Self::browser_signals())
    }

    #[must_use]
    pub fn other_fingerprint() -> ClientFingerprint {
        Self::fingerprinter().fingerprint(&Self::other_device_signals())
    }

    /// Tokens whose access token expires in `expires_in_secs` seconds
    #[must_use]
    pub fn tokens(expires_in_secs: i64) -> SessionTokens {
        SessionTokens {
            access_token: "test_access_token".to_string(),
            access_token_expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
            refresh_token: Some("test_refresh_token".to_string()),
        }
    }
}
