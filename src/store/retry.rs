//! Bounded exponential backoff for transient backend failures

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff schedule: `base * 2^n`, capped, for at most `max_attempts` tries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_max_attempts() -> u32 {
    6
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetryPolicy {
    /// Policy that makes exactly one attempt
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 0,
            max_attempts: 1,
        }
    }

    /// Delay to wait after the `attempt`-th failure (1-based)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out
    ///
    /// `is_transient` decides whether an error is worth another attempt.
    ///
    /// # Errors
    ///
    /// Returns the last error produced by `operation`
    pub async fn run<T, E, F, Fut, P>(&self, what: &str, is_transient: P, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && is_transient(&e) => {
                    let delay = self.delay_for(attempt);
                    log::warn!(
                        "{what} failed (attempt {attempt}/{max_attempts}), retrying in {delay:?}: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
