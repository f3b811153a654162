//! Backoff for throttled AWS calls.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Upper bound accepted for `cloudwatch.max_retries`.
pub const MAX_RETRIES_LIMIT: usize = 10;

const BASE_DELAY: Duration = Duration::from_millis(200);
const MAX_DELAY: Duration = Duration::from_secs(5);

/// 200ms, 400ms, 800ms, ... capped at 5s for any attempt number.
pub fn backoff_delay(attempt: usize) -> Duration {
    let exponent = u32::try_from(attempt).unwrap_or(u32::MAX);
    BASE_DELAY
        .checked_mul(2_u32.saturating_pow(exponent))
        .map_or(MAX_DELAY, |delay| delay.min(MAX_DELAY))
}

/// Run `call`, retrying only throttling errors, at most `max_retries` times.
pub async fn retry_throttled<T, F, Fut>(
    service: &str,
    operation: &str,
    max_retries: usize,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_throttling() && attempt < max_retries => {
                let delay = backoff_delay(attempt);
                tracing::warn!(
                    service,
                    operation,
                    attempt = attempt + 1,
                    max_retries,
                    ?delay,
                    "Request throttled, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloudProviderError;
    use std::cell::Cell;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(200));
        assert_eq!(backoff_delay(1), Duration::from_millis(400));
        assert_eq!(backoff_delay(4), Duration::from_millis(3200));
        assert_eq!(backoff_delay(5), MAX_DELAY);
    }

    #[test]
    fn backoff_never_overflows() {
        for attempt in [31, 32, 33, 64, usize::MAX] {
            assert_eq!(backoff_delay(attempt), MAX_DELAY, "attempt {attempt}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_throttling_up_to_limit() {
        let calls = Cell::new(0);
        let result: Result<()> = retry_throttled("monitoring", "GetMetricData", 3, || {
            calls.set(calls.get() + 1);
            async {
                Err(CloudProviderError::RateLimited {
                    service: "monitoring".to_string(),
                })
            }
        })
        .await;

        assert!(result.unwrap_err().is_throttling());
        assert_eq!(calls.get(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<()> = retry_throttled("ec2", "DescribeInstances", 3, || {
            calls.set(calls.get() + 1);
            async { Err(CloudProviderError::MalformedResponse("bad".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_throttle() {
        let calls = Cell::new(0);
        let result = retry_throttled("monitoring", "ListMetrics", 3, || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n < 3 {
                    Err(CloudProviderError::RateLimited {
                        service: "monitoring".to_string(),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }
}
