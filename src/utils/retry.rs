// =============================================================================
// utils/retry.rs
// =============================================================================
// Helper: call_with_retry - timeout + exponential backoff + full jitter
// Usage: wrap individual enrichment-provider calls with this. The pipeline
// itself never retries; retry policy belongs to the agent making the call.
// =============================================================================

use anyhow::Result;
use rand::Rng;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Default provider timeout per attempt (ms)
pub const PROVIDER_TIMEOUT_MS: u64 = 10_000;
/// Max attempts including first
pub const PROVIDER_MAX_RETRIES: usize = 3;
/// Base backoff (ms)
const BACKOFF_BASE_MS: u64 = 250;
/// Maximum backoff cap (ms)
const BACKOFF_MAX_MS: u64 = 30_000;

/// Retry policy for a single provider
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_attempts: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(PROVIDER_TIMEOUT_MS),
            max_attempts: PROVIDER_MAX_RETRIES,
            backoff_base_ms: BACKOFF_BASE_MS,
            backoff_max_ms: BACKOFF_MAX_MS,
        }
    }
}

impl RetryPolicy {
    pub fn with_timeout_secs(secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(secs),
            ..Self::default()
        }
    }
}

/// Call async closure `op` with the default retry/backoff policy.
///
/// # Example
/// ```no_run
/// use token_analyst::utils::retry::call_with_retry;
///
/// async fn example() -> anyhow::Result<String> {
///     call_with_retry(|| async {
///         // Provider request here
///         Ok("result".to_string())
///     }).await
/// }
/// ```
pub async fn call_with_retry<F, Fut, T>(op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    call_with_policy(&RetryPolicy::default(), op).await
}

/// Call async closure `op`, retrying timeouts and errors per `policy`.
///
/// # Returns
/// * `Ok(T)` - Success result from the operation
/// * `Err` - Last error after all attempts are exhausted
pub async fn call_with_policy<F, Fut, T>(policy: &RetryPolicy, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = match timeout(policy.timeout, op()).await {
            Ok(res) => res,
            Err(_) => Err(anyhow::anyhow!(
                "provider call timed out after {}ms",
                policy.timeout.as_millis()
            )),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= max_attempts {
                    return Err(e.context(format!("giving up after {} attempts", attempt)));
                }

                let backoff_ms =
                    calculate_backoff_with_jitter(attempt, policy.backoff_base_ms, policy.backoff_max_ms);
                tracing::debug!(
                    "Provider call failed (attempt {}/{}): {}. Retrying in {}ms...",
                    attempt,
                    max_attempts,
                    e,
                    backoff_ms
                );
                sleep(Duration::from_millis(backoff_ms)).await;
            }
        }
    }
}

/// Calculate exponential backoff with full jitter
///
/// Formula: random(0, min(max_ms, base_ms * 2^(attempt-1)))
fn calculate_backoff_with_jitter(attempt: usize, base_ms: u64, max_ms: u64) -> u64 {
    let mut rng = rand::thread_rng();

    let exp_backoff =
        base_ms.saturating_mul(2_u64.saturating_pow((attempt.saturating_sub(1)) as u32));
    let capped_backoff = exp_backoff.min(max_ms);

    rng.gen_range(0..=capped_backoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(50),
            max_attempts: 3,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
        }
    }

    #[test]
    fn test_backoff_calculation() {
        assert!(calculate_backoff_with_jitter(1, BACKOFF_BASE_MS, BACKOFF_MAX_MS) <= BACKOFF_BASE_MS);
        assert!(calculate_backoff_with_jitter(2, BACKOFF_BASE_MS, BACKOFF_MAX_MS) <= BACKOFF_BASE_MS * 2);
        assert!(calculate_backoff_with_jitter(3, BACKOFF_BASE_MS, BACKOFF_MAX_MS) <= BACKOFF_BASE_MS * 4);
        assert!(calculate_backoff_with_jitter(40, BACKOFF_BASE_MS, BACKOFF_MAX_MS) <= BACKOFF_MAX_MS);
    }

    #[tokio::test]
    async fn test_retry_success_on_first_attempt() {
        let result = call_with_retry(|| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = call_with_policy(&fast_policy(), || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(anyhow::anyhow!("transient"))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result: Result<i32> = call_with_policy(&fast_policy(), || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("Permanent failure"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_times_out_slow_calls() {
        let result: Result<i32> = call_with_policy(&fast_policy(), || async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(1)
        })
        .await;

        assert!(result.is_err());
    }
}
