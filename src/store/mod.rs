//! Session storage
//!
//! [`SessionStore`] is the single seam between the session logic and its
//! backing storage. Two implementations behave identically from a caller's
//! point of view:
//!
//! - [`memory::InProcessSessionStore`] - sharded in-memory map with lazy and
//!   periodic expiry
//! - [`redis::NetworkedSessionStore`] - Redis with native key expiry, retries
//!   and a liveness probe
//!
//! Which one runs is decided once at start-up; consumers only hold an
//! `Arc<dyn SessionStore>`.
//!
//! Stores deal in opaque byte payloads. Records are encoded by
//! [`codec::RecordCodec`] before they reach a store.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{SessionError, SessionResult};

pub mod codec;
pub mod memory;
pub mod redis;
pub mod retry;

pub use codec::RecordCodec;
pub use memory::InProcessSessionStore;
pub use redis::NetworkedSessionStore;
pub use retry::RetryPolicy;

/// Keyed byte storage with per-entry expiration
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store `payload` under `key`, replacing any previous value atomically
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects or cannot complete the write
    async fn set(&self, key: &str, payload: &[u8], ttl: Duration) -> SessionResult<()>;

    /// Replace the payload of a live `key`, never creating it
    ///
    /// Returns `false` and writes nothing when `key` is absent or expired, so
    /// an update racing a delete cannot bring the entry back.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects or cannot complete the write
    async fn set_if_present(&self, key: &str, payload: &[u8], ttl: Duration) -> SessionResult<bool>;

    /// Fetch the payload for `key`; absent and expired keys yield `None`
    ///
    /// # Errors
    ///
    /// Returns an error only for backend failures, never for a missing key
    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>>;

    /// Fetch and remove in one atomic step
    ///
    /// # Errors
    ///
    /// Returns an error only for backend failures, never for a missing key
    async fn take(&self, key: &str) -> SessionResult<Option<Vec<u8>>>;

    /// Remove `key`; removing an absent key succeeds
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot complete the delete
    async fn delete(&self, key: &str) -> SessionResult<()>;

    /// # Errors
    ///
    /// Returns an error only for backend failures
    async fn exists(&self, key: &str) -> SessionResult<bool>;

    /// All live keys starting with `prefix`
    ///
    /// # Errors
    ///
    /// Returns an error if the backend scan fails
    async fn list_by_prefix(&self, prefix: &str) -> SessionResult<Vec<String>>;

    /// Whether the backend is currently usable
    async fn health_check(&self) -> bool;

    /// Stop background tasks and release connections
    async fn close(&self);

    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;
}

impl std::fmt::Debug for dyn SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("backend", &self.backend_name())
            .finish()
    }
}

/// Await a store read, failing with `Timeout` after `deadline`
///
/// Dropping the returned future cancels the read.
pub(crate) async fn with_deadline<T>(
    deadline: Duration,
    operation: impl Future<Output = SessionResult<T>>,
) -> SessionResult<T> {
    tokio::time::timeout(deadline, operation).await?
}

/// Run `operation` on its own task and wait for its result
///
/// Dropping the returned future does not cancel `operation`.
pub(crate) async fn detached<T, F>(operation: F) -> SessionResult<T>
where
    T: Send + 'static,
    F: Future<Output = SessionResult<T>> + Send + 'static,
{
    match tokio::spawn(operation).await {
        Ok(result) => result,
        Err(e) => Err(SessionError::Backend(format!("detached task failed: {e}"))),
    }
}

/// Run a store write on its own task and wait up to `deadline` for it
///
/// The write runs to completion even when the caller stops waiting, either
/// because the deadline passed or because the caller's future was dropped.
pub(crate) async fn detached_write<T, F>(deadline: Duration, operation: F) -> SessionResult<T>
where
    T: Send + 'static,
    F: Future<Output = SessionResult<T>> + Send + 'static,
{
    tokio::time::timeout(deadline, detached(operation)).await?
}
