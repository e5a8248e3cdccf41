use std::future::Future;
use std::time::Duration;

use tracing::warn;

use digest_llm::GenerateError;

/// How rate-limited generation work is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed wait before the next attempt.
    pub backoff: Duration,
    /// `None` retries until the provider lets the request through.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn new(backoff: Duration, max_attempts: u32) -> Self {
        Self {
            backoff,
            max_attempts: (max_attempts > 0).then_some(max_attempts),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(20),
            max_attempts: None,
        }
    }
}

/// Run `attempt` until it succeeds, fails with something other than a rate
/// limit, or the policy's attempt ceiling is reached.  Every retry starts the
/// whole operation over.
pub async fn retry_on_rate_limit<T, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    mut attempt: F,
) -> Result<T, GenerateError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GenerateError>>,
{
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_rate_limit() => {
                if policy.max_attempts.is_some_and(|max| attempts >= max) {
                    warn!(operation, attempts, "rate limited, giving up");
                    return Err(err);
                }
                warn!(
                    operation,
                    attempts,
                    backoff_secs = policy.backoff.as_secs_f32(),
                    "rate limited, backing off before retry"
                );
                tokio::time::sleep(policy.backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}
