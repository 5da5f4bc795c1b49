//! Bounded exponential-backoff retry around a single remote call.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::{MigrateError, MigrateResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts never exceed `max_attempts + 1`.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            jitter_max: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (counted from 1), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Full delay before retry number `retry`: backoff plus jitter, saturating
    /// at `Duration::MAX`.
    pub fn delay(&self, retry: u32) -> Duration {
        self.backoff(retry).saturating_add(self.jitter())
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.jitter_max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Where backoff delays are spent. Swapped out in tests so retry timing is
/// observable without real waiting.
#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Runs operations under a [`RetryPolicy`]; every error counts as transient.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sleeper(policy, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds or the budget is spent.
    ///
    /// Fails with [`MigrateError::ExhaustedRetry`] carrying the last error after
    /// exactly `max_attempts + 1` attempts.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut op: F) -> MigrateResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if attempt > self.policy.max_attempts {
                return Err(MigrateError::exhausted(label, attempt, err));
            }
            let delay = self.policy.delay(attempt);
            warn!(
                label,
                attempt,
                max = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %format!("{err:#}"),
                "remote call failed; backing off"
            );
            self.sleeper.sleep(delay).await;
        }
    }
}
