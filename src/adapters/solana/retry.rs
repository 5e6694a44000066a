//! Retry policy shared by every RPC call
//!
//! Each endpoint gets one attempt plus `max_retries` retries with capped
//! exponential backoff, then the next endpoint is tried. Every attempt is
//! bounded by `timeout`, so the worst case for one call is known up front.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::domain::ReadError;

/// Maximum jitter as a fraction of the backoff delay
const JITTER_FRACTION: f64 = 0.10;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Retries per endpoint after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// Result of a call run under the policy
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, ReadError>,
    /// Endpoint that answered, or the last one tried
    pub endpoint: Option<String>,
    /// Attempts beyond the first
    pub retries: u32,
}

impl RetryPolicy {
    /// Backoff before retry number `attempt + 1`, without jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        let max_jitter = (delay.as_millis() as f64 * JITTER_FRACTION) as u64;
        if max_jitter == 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0..=max_jitter);
        delay + Duration::from_millis(jitter)
    }

    /// Upper bound on time spent in one call across all endpoints
    pub fn worst_case(&self, endpoints: usize) -> Duration {
        let per_endpoint = (0..self.max_retries).fold(
            self.timeout * (self.max_retries + 1),
            |acc, attempt| {
                let delay = self.delay_for(attempt);
                acc + delay + delay.mul_f64(JITTER_FRACTION)
            },
        );
        per_endpoint * endpoints as u32
    }

    /// Run `op` against each endpoint in order until one succeeds
    pub async fn execute<T, F, Fut>(&self, endpoints: &[String], op: F) -> Attempted<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, ReadError>>,
    {
        let mut last_error = ReadError::Transport("no endpoints configured".to_string());
        let mut last_endpoint = None;
        let mut attempts = 0u32;

        for endpoint in endpoints {
            for attempt in 0..=self.max_retries {
                attempts += 1;
                last_endpoint = Some(endpoint.clone());

                let outcome = match tokio::time::timeout(self.timeout, op(endpoint.clone())).await {
                    Ok(result) => result,
                    Err(_) => Err(ReadError::Timeout(self.timeout.as_millis() as u64)),
                };

                match outcome {
                    Ok(value) => {
                        return Attempted {
                            result: Ok(value),
                            endpoint: last_endpoint,
                            retries: attempts - 1,
                        };
                    }
                    Err(e) => {
                        tracing::debug!(
                            "RPC attempt {}/{} on {} failed: {}",
                            attempt + 1,
                            self.max_retries + 1,
                            endpoint,
                            e
                        );
                        last_error = e;
                    }
                }

                if attempt < self.max_retries {
                    tokio::time::sleep(self.jittered_delay(attempt)).await;
                }
            }
            tracing::debug!("Endpoint {} exhausted, rotating", endpoint);
        }

        Attempted {
            result: Err(last_error),
            endpoint: last_endpoint,
            retries: attempts.saturating_sub(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(50),
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn endpoints(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            timeout: Duration::from_secs(1),
            max_retries: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(40), Duration::from_secs(8));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let d = policy.jittered_delay(1);
            assert!(d >= Duration::from_millis(1000));
            assert!(d <= Duration::from_millis(1100));
        }
    }

    #[tokio::test]
    async fn test_first_success_has_no_retries() {
        let policy = fast_policy(2);
        let attempted = policy
            .execute(&endpoints(&["a", "b"]), |_| async { Ok::<_, ReadError>(7u64) })
            .await;

        assert_eq!(attempted.result, Ok(7));
        assert_eq!(attempted.endpoint.as_deref(), Some("a"));
        assert_eq!(attempted.retries, 0);
    }

    #[tokio::test]
    async fn test_rotates_to_next_endpoint() {
        let policy = fast_policy(1);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let attempted = policy
            .execute(&endpoints(&["primary", "backup"]), |endpoint| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(endpoint.clone());
                    if endpoint == "primary" {
                        Err(ReadError::Transport("refused".into()))
                    } else {
                        Ok(42u64)
                    }
                }
            })
            .await;

        assert_eq!(attempted.result, Ok(42));
        assert_eq!(attempted.endpoint.as_deref(), Some("backup"));
        assert_eq!(attempted.retries, 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["primary".to_string(), "primary".to_string(), "backup".to_string()]
        );
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let policy = fast_policy(2);
        let calls = Arc::new(AtomicU32::new(0));

        let attempted = policy
            .execute(&endpoints(&["a", "b"]), |_| {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Err::<u64, _>(ReadError::MalformedResponse(format!("call {}", n)))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(attempted.retries, 5);
        assert_eq!(attempted.endpoint.as_deref(), Some("b"));
        assert_eq!(attempted.result, Err(ReadError::MalformedResponse("call 5".into())));
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let policy = fast_policy(0);
        let attempted = policy
            .execute(&endpoints(&["slow"]), |_| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<_, ReadError>(1u64)
            })
            .await;

        assert_eq!(attempted.result, Err(ReadError::Timeout(50)));
    }

    #[tokio::test]
    async fn test_no_endpoints_is_a_failure() {
        let policy = fast_policy(3);
        let attempted = policy.execute(&[], |_| async { Ok::<_, ReadError>(1u64) }).await;

        assert!(matches!(attempted.result, Err(ReadError::Transport(_))));
        assert!(attempted.endpoint.is_none());
        assert_eq!(attempted.retries, 0);
    }

    #[test]
    fn test_worst_case_bound() {
        let policy = fast_policy(1);
        // (2 x 50ms timeout + 1ms backoff + jitter) per endpoint
        let bound = policy.worst_case(2);
        assert!(bound >= Duration::from_millis(202));
        assert!(bound <= Duration::from_millis(203));
    }
}
