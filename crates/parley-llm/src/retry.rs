//! Overload retry with exponential backoff.
//!
//! Only the transient overload class (rate limit, overloaded) is retried.
//! Anything else propagates on the first failure. Once the attempts run out
//! the caller gets [`ProviderError::ProviderOverloaded`] instead of the raw
//! vendor error.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use parley_core::{ChatResult, ProviderError};
use parley_settings::RetrySettings;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound on a server-suggested delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(s: &RetrySettings) -> Self {
        Self {
            max_attempts: s.max_attempts.max(1),
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
        }
    }
}

impl RetryConfig {
    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }

    /// Backoff for `attempt`, stretched to a server hint capped at `max_delay`.
    pub fn delay_with_hint(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let backoff = self.delay_for(attempt);
        hint.map_or(backoff, |h| h.min(self.max_delay).max(backoff))
    }
}

/// Run `op` until it succeeds, fails with a non-overload error, or the
/// attempts are exhausted. A cancel during backoff ends with an empty
/// cancelled result.
pub async fn with_overload_retry<F, Fut>(
    provider: &str,
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<ChatResult, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<ChatResult, ProviderError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let err = match op(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_overload() => e,
            Err(e) => return Err(e),
        };

        if attempt >= max_attempts {
            warn!(
                provider,
                attempts = attempt,
                error = %err,
                "provider still overloaded after final attempt"
            );
            return Err(ProviderError::ProviderOverloaded {
                provider: provider.to_string(),
                attempts: attempt,
            });
        }

        let delay = config.delay_with_hint(attempt, err.suggested_delay());
        warn!(
            provider,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error_kind = err.error_kind(),
            "provider overloaded, backing off"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(ChatResult::cancelled()),
            () = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
