//! Mock objects and fake implementations for testing

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{SessionError, SessionResult};
use crate::oauth::{RefreshedTokens, TokenRefresher};
use crate::store::SessionStore;

#[derive(Debug, Clone)]
enum RefreshBehavior {
    Succeed { lifetime_secs: i64, rotate: bool },
    Fail(String),
}

/// Scriptable [`TokenRefresher`] that records its calls
#[derive(Debug)]
pub struct MockTokenRefresher {
    behavior: RefreshBehavior,
    delay: Option<Duration>,
    calls: AtomicUsize,
    last_request: Mutex<Option<(String, String)>>,
}

impl MockTokenRefresher {
    fn with_behavior(behavior: RefreshBehavior) -> Self {
        Self {
            behavior,
            delay: None,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Issues `refreshed_access_token`, keeping the refresh token
    #[must_use]
    pub fn succeeding(lifetime_secs: i64) -> Self {
        Self::with_behavior(RefreshBehavior::Succeed {
            lifetime_secs,
            rotate: false,
        })
    }

    /// Also rotates the refresh token to `rotated_refresh_token`
    #[must_use]
    pub fn rotating(lifetime_secs: i64) -> Self {
        Self::with_behavior(RefreshBehavior::Succeed {
            lifetime_secs,
            rotate: true,
        })
    }

    /// Rejects every grant with `IdentityProvider`
    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self::with_behavior(RefreshBehavior::Fail(message.to_string()))
    }

    /// Answer only after `delay`
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(provider, refresh_token)` of the latest call
    #[must_use]
    pub fn last_request(&self) -> Option<(String, String)> {
        self.last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TokenRefresher for MockTokenRefresher {
    async fn refresh(&self, provider: &str, refresh_token: &str) -> SessionResult<RefreshedTokens> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner) =
            Some((provider.to_string(), refresh_token.to_string()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.behavior {
            RefreshBehavior::Succeed {
                lifetime_secs,
                rotate,
            } => Ok(RefreshedTokens {
                access_token: "refreshed_access_token".to_string(),
                expires_at: Utc::now() + chrono::Duration::seconds(*lifetime_secs),
                refresh_token: rotate.then(|| "rotated_refresh_token".to_string()),
            }),
            RefreshBehavior::Fail(message) => Err(SessionError::IdentityProvider(message.clone())),
        }
    }
}

/// [`SessionStore`] wrapper that injects latency and removal failures
pub struct FaultyStore {
    inner: Arc<dyn SessionStore>,
    failing_removals: AtomicU32,
    removal_attempts: AtomicU32,
    latency: Mutex<Option<Duration>>,
}

impl FaultyStore {
    #[must_use]
    pub fn new(inner: Arc<dyn SessionStore>) -> Self {
        Self {
            inner,
            failing_removals: AtomicU32::new(0),
            removal_attempts: AtomicU32::new(0),
            latency: Mutex::new(None),
        }
    }

    /// Make the next `count` removals (`delete` or `take`) fail with
    /// `BackendUnavailable`
    pub fn fail_next_removals(&self, count: u32) {
        self.failing_removals.store(count, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// `delete` and `take` calls seen so far
    #[must_use]
    pub fn removal_attempts(&self) -> u32 {
        self.removal_attempts.load(Ordering::SeqCst)
    }

    fn injected_removal_failure(&self) -> SessionResult<()> {
        self.removal_attempts.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failing_removals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(SessionError::BackendUnavailable("injected removal failure".to_string()));
        }
        Ok(())
    }

    async fn lag(&self) {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl SessionStore for FaultyStore {
    async fn set(&self, key: &str, payload: &[u8], ttl: Duration) -> SessionResult<()> {
        self.lag().await;
        self.inner.set(key, payload, ttl).await
    }

    async fn set_if_present(&self, key: &str, payload: &[u8], ttl: Duration) -> SessionResult<bool> {
        self.lag().await;
        self.inner.set_if_present(key, payload, ttl).await
    }

    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
        self.lag().await;
        self.inner.get(key).await
    }

    async fn take(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
        self.lag().await;
        self.injected_removal_failure()?;
        self.inner.take(key).await
    }

    async fn delete(&self, key: &str) -> SessionResult<()> {
        self.lag().await;
        self.injected_removal_failure()?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> SessionResult<bool> {
        self.lag().await;
        self.inner.exists(key).await
    }

    async fn list_by_prefix(&self, prefix: &str) -> SessionResult<Vec<String>> {
        self.lag().await;
        self.inner.list_by_prefix(prefix).await
    }

    async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }

    async fn close(&self) {
        self.inner.close().await;
    }

    fn backend_name(&self) -> &'static str {
        "faulty"
    }
}
