use std::future::Future;
use std::time::Duration;

/// Backoff settings for calls to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(100),
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Delay before retry number `attempt` (1-based): base, 2x base, 4x base...
    /// plus up to 100ms of jitter.
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt.saturating_sub(1)).min(16);
        let jitter_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos()
            % 100;
        let jitter = if self.base_delay.is_zero() {
            Duration::ZERO
        } else {
            Duration::from_millis(u64::from(jitter_ms))
        };
        self.base_delay * factor + jitter
    }
}

/// Run `f` until it succeeds, `retryable` rejects the error, or the policy
/// runs out of retries.
pub async fn with_retry<F, Fut, T, E, R>(policy: RetryPolicy, retryable: R, f: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut retries = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if retries < policy.max_retries && retryable(&e) => {
                retries += 1;
                let delay = policy.delay(retries);
                tracing::debug!(attempt = retries, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
