use crate::infrastructure::config::RetrySettings;
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use tokio::time::{Duration, sleep};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound of the uniform jitter added to every delay.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetrySettings::default().into()
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay_ms: settings.base_delay_ms,
            max_delay_ms: settings.max_delay_ms,
            jitter_ms: settings.jitter_ms,
        }
    }
}

impl RetryPolicy {
    pub fn no_delay(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_ms: 0,
        }
    }

    /// Backoff before the attempt following `attempt` (0-based), without jitter.
    pub fn capped_delay_ms(&self, attempt: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(self.max_delay_ms)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=self.jitter_ms)
        };
        Duration::from_millis(self.capped_delay_ms(attempt).saturating_add(jitter))
    }
}

#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub error: E,
}

/// Runs `operation` until it succeeds, `should_retry` rejects the error, or
/// the policy's attempts are used up. The operation receives the 0-based
/// attempt number.
pub async fn with_retry<T, E, Op, Fut, P>(
    policy: &RetryPolicy,
    should_retry: P,
    mut operation: Op,
) -> Result<T, RetryExhausted<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if should_retry(&error) && attempt + 1 < max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "transient failure, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                return Err(RetryExhausted {
                    attempts: attempt + 1,
                    error,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::error::InfraError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter_ms: 0,
        };
        let delays: Vec<u64> = (0..6).map(|attempt| policy.capped_delay_ms(attempt)).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 50,
            jitter_ms: 20,
        };
        for _ in 0..200 {
            let delay = policy.delay_for(0).as_millis();
            assert!((50..=70).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let policy = RetryPolicy {
            max_attempts: 100,
            base_delay_ms: u64::MAX / 2,
            max_delay_ms: 30_000,
            jitter_ms: 0,
        };
        assert_eq!(policy.capped_delay_ms(90), 30_000);
    }

    #[tokio::test]
    async fn transient_failures_self_heal() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryPolicy::no_delay(3), InfraError::is_transient, |_| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err(InfraError::Network("connection reset".to_string()))
                } else {
                    Ok(call)
                }
            }
        })
        .await
        .expect("third attempt succeeds");

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_report_attempts() {
        let calls = AtomicU32::new(0);
        let exhausted = with_retry(&RetryPolicy::no_delay(4), InfraError::is_transient, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(InfraError::SheetsApi {
                    status: 429,
                    body: "rate limited".to_string(),
                })
            }
        })
        .await
        .expect_err("always failing");

        assert_eq!(exhausted.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let exhausted = with_retry(&RetryPolicy::no_delay(5), InfraError::is_transient, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(InfraError::SheetsApi {
                    status: 400,
                    body: "bad range".to_string(),
                })
            }
        })
        .await
        .expect_err("permanent failure");

        assert_eq!(exhausted.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let _ = with_retry(&RetryPolicy::no_delay(0), |_: &InfraError| true, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(InfraError::Network("down".to_string())) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
