//! Redis-backed session store
//!
//! Entries expire through Redis itself (`SET ... PX`), so there is no
//! application-side sweep. Conditional updates use `SET ... XX`, which Redis
//! applies atomically against a concurrent `DEL`.
//!
//! All commands go through a multiplexed [`ConnectionManager`]; a background
//! probe `PING`s it periodically and swaps in a freshly built manager when the
//! probe fails.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Cmd, FromRedisValue, RedisError};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::{RetryPolicy, SessionStore};
use crate::error::{SessionError, SessionResult};

/// Keys fetched per `SCAN` round trip
const SCAN_PAGE_SIZE: u64 = 100;

/// Upper bound for a liveness `PING` or a reconnect attempt
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings for [`NetworkedSessionStore`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisStoreConfig {
    #[serde(default = "default_url")]
    pub url: String,
    /// Namespace prepended to every key; invisible to callers
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Seconds between liveness probes; 0 disables the probe
    #[serde(default = "default_liveness_interval_secs")]
    pub liveness_interval_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_key_prefix() -> String {
    "authsession:".to_string()
}
fn default_liveness_interval_secs() -> u64 {
    30
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            key_prefix: default_key_prefix(),
            liveness_interval_secs: default_liveness_interval_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Errors worth another attempt: the request may not have reached Redis
fn is_transient(err: &RedisError) -> bool {
    err.is_io_error() || err.is_timeout() || err.is_connection_dropped() || err.is_connection_refusal()
}

fn classify(what: &str, err: &RedisError) -> SessionError {
    if is_transient(err) {
        log::warn!("{what} failed after retries: {err}");
        SessionError::BackendUnavailable(err.to_string())
    } else {
        log::error!("{what} rejected by redis: {err}");
        SessionError::Backend(err.to_string())
    }
}

/// Strip credentials from a connection URL before it is logged
fn redacted_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<unparseable redis url>".to_string(),
    }
}

/// Escape glob metacharacters so a literal prefix can be used in `MATCH`
fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

struct Inner {
    client: Client,
    connection: RwLock<ConnectionManager>,
    key_prefix: String,
    retry: RetryPolicy,
    closed: AtomicBool,
}

impl Inner {
    fn connection(&self) -> ConnectionManager {
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn ensure_open(&self) -> SessionResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::BackendUnavailable("session store is closed".to_string()));
        }
        Ok(())
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    /// Run one command with the retry policy applied to transient failures
    async fn query<T, B>(&self, what: &str, build: B) -> SessionResult<T>
    where
        T: FromRedisValue + Send,
        B: Fn() -> Cmd + Send + Sync,
    {
        self.ensure_open()?;
        self.retry
            .run(what, is_transient, || {
                let cmd = build();
                let mut conn = self.connection();
                async move { cmd.query_async(&mut conn).await }
            })
            .await
            .map_err(|e| classify(what, &e))
    }

    async fn ping(&self) -> bool {
        let mut conn = self.connection();
        let ping = async move {
            let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
            pong
        };
        matches!(tokio::time::timeout(PROBE_TIMEOUT, ping).await, Ok(Ok(_)))
    }

    async fn reconnect(&self) -> SessionResult<()> {
        let fresh = tokio::time::timeout(PROBE_TIMEOUT, ConnectionManager::new(self.client.clone()))
            .await?
            .map_err(|e| SessionError::BackendUnavailable(e.to_string()))?;
        *self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner) = fresh;
        Ok(())
    }
}

async fn liveness_probe(inner: Weak<Inner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.closed.load(Ordering::Acquire) {
            break;
        }
        if inner.ping().await {
            continue;
        }
        log::warn!("Redis liveness probe failed, rebuilding connection");
        match inner.reconnect().await {
            Ok(()) => log::info!("Redis connection rebuilt"),
            Err(e) => log::error!("Failed to rebuild redis connection: {e}"),
        }
    }
}

/// [`SessionStore`] backed by Redis
pub struct NetworkedSessionStore {
    inner: Arc<Inner>,
    probe: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for NetworkedSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkedSessionStore")
            .field("key_prefix", &self.inner.key_prefix)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl NetworkedSessionStore {
    /// Connect to Redis and start the liveness probe
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a malformed URL and `BackendUnavailable`
    /// when the initial connection cannot be established
    pub async fn connect(config: RedisStoreConfig) -> SessionResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| SessionError::InvalidInput(format!("redis url: {e}")))?;

        let manager = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| SessionError::BackendUnavailable(e.to_string()))?;

        log::info!(
            "Connected to redis session store at {}",
            redacted_url(&config.url)
        );

        let inner = Arc::new(Inner {
            client,
            connection: RwLock::new(manager),
            key_prefix: config.key_prefix,
            retry: config.retry,
            closed: AtomicBool::new(false),
        });

        let probe = (config.liveness_interval_secs > 0).then(|| {
            tokio::spawn(liveness_probe(
                Arc::downgrade(&inner),
                Duration::from_secs(config.liveness_interval_secs),
            ))
        });

        Ok(Self {
            inner,
            probe: Mutex::new(probe),
        })
    }
}

impl Drop for NetworkedSessionStore {
    fn drop(&mut self) {
        if let Some(handle) = self
            .probe
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

#[async_trait]
impl SessionStore for NetworkedSessionStore {
    async fn set(&self, key: &str, payload: &[u8], ttl: Duration) -> SessionResult<()> {
        let key = self.inner.namespaced(key);
        let millis = ttl_millis(ttl);
        let _: () = self
            .inner
            .query("redis SET", || {
                let mut cmd = redis::cmd("SET");
                cmd.arg(&key).arg(payload).arg("PX").arg(millis);
                cmd
            })
            .await?;
        Ok(())
    }

    async fn set_if_present(&self, key: &str, payload: &[u8], ttl: Duration) -> SessionResult<bool> {
        let key = self.inner.namespaced(key);
        let millis = ttl_millis(ttl);
        // Nil reply when the key does not exist
        let reply: Option<String> = self
            .inner
            .query("redis SET XX", || {
                let mut cmd = redis::cmd("SET");
                cmd.arg(&key).arg(payload).arg("PX").arg(millis).arg("XX");
                cmd
            })
            .await?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
        let key = self.inner.namespaced(key);
        self.inner
            .query("redis GET", || {
                let mut cmd = redis::cmd("GET");
                cmd.arg(&key);
                cmd
            })
            .await
    }

    async fn take(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
        let key = self.inner.namespaced(key);
        self.inner
            .query("redis GETDEL", || {
                let mut cmd = redis::cmd("GETDEL");
                cmd.arg(&key);
                cmd
            })
            .await
    }

    async fn delete(&self, key: &str) -> SessionResult<()> {
        let key = self.inner.namespaced(key);
        let _: u64 = self
            .inner
            .query("redis DEL", || {
                let mut cmd = redis::cmd("DEL");
                cmd.arg(&key);
                cmd
            })
            .await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> SessionResult<bool> {
        let key = self.inner.namespaced(key);
        let count: u64 = self
            .inner
            .query("redis EXISTS", || {
                let mut cmd = redis::cmd("EXISTS");
                cmd.arg(&key);
                cmd
            })
            .await?;
        Ok(count > 0)
    }

    async fn list_by_prefix(&self, prefix: &str) -> SessionResult<Vec<String>> {
        let pattern = format!("{}*", escape_glob(&self.inner.namespaced(prefix)));
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, page): (u64, Vec<String>) = self
                .inner
                .query("redis SCAN", || {
                    let mut cmd = redis::cmd("SCAN");
                    cmd.arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_PAGE_SIZE);
                    cmd
                })
                .await?;

            keys.extend(
                page.into_iter()
                    .filter_map(|k| k.strip_prefix(&self.inner.key_prefix).map(str::to_string)),
            );

            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may report a key more than once
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn health_check(&self) -> bool {
        if self.inner.closed.load(Ordering::Acquire) {
            return false;
        }
        self.inner.ping().await
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        if let Some(handle) = self
            .probe
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        log::info!("Redis session store closed");
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
