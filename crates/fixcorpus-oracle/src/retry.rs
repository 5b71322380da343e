//! Oracle call controls: per-attempt timeout and retry with exponential backoff.
//!
//! Only transient errors (timeout, rate limit, unavailable) are retried.
//! Permanent errors surface on the first attempt. When the retry budget is
//! spent the caller receives [`OracleError::Exhausted`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{OracleError, OracleResult};
use crate::{Oracle, OracleRequest};

/// Timeout and retry budget for oracle calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum wall-clock time for a single attempt (milliseconds).
    pub timeout_ms: u64,
    /// Maximum number of retries (0 = no retries, call once).
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries (milliseconds).
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 2,
            backoff_base_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), honoring a server hint.
    pub fn delay_for(&self, attempt: u32, err: &OracleError) -> Duration {
        let backoff = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let hinted = match err {
            OracleError::RateLimited {
                retry_after_ms: Some(ms),
            } => *ms,
            _ => 0,
        };
        Duration::from_millis(backoff.max(hinted))
    }
}

/// Wraps any oracle with [`RetryPolicy`] controls.
#[derive(Debug)]
pub struct RetryingOracle<O> {
    inner: O,
    policy: RetryPolicy,
}

impl<O: Oracle> RetryingOracle<O> {
    pub fn new(inner: O, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }
}

#[async_trait]
impl<O: Oracle> Oracle for RetryingOracle<O> {
    async fn complete(&self, request: &OracleRequest) -> OracleResult<String> {
        let max_attempts = self.policy.max_retries + 1;
        let timeout = Duration::from_millis(self.policy.timeout_ms);

        let mut last_err = OracleError::Exhausted {
            attempts: 0,
            reason: "no attempt made".into(),
        };

        for attempt in 1..=max_attempts {
            let err = match tokio::time::timeout(timeout, self.inner.complete(request)).await {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(err)) => err,
                Err(_elapsed) => OracleError::Timeout {
                    elapsed_ms: self.policy.timeout_ms,
                },
            };

            if !err.is_transient() {
                return Err(err);
            }

            if attempt < max_attempts {
                let delay = self.policy.delay_for(attempt, &err);
                tracing::warn!(
                    event = "oracle.retry",
                    task = %request.task,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient oracle failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            last_err = err;
        }

        Err(OracleError::Exhausted {
            attempts: max_attempts,
            reason: last_err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OracleTask, Prompt, ScriptedOracle, ScriptedReply};

    fn request() -> OracleRequest {
        OracleRequest::new(OracleTask::Classify, Prompt::new("s", "u"))
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            timeout_ms: 1_000,
            max_retries,
            backoff_base_ms: 10,
        }
    }

    #[test]
    fn default_policy() {
        let p = RetryPolicy::default();
        assert_eq!(p.timeout_ms, 30_000);
        assert_eq!(p.max_retries, 2);
        assert_eq!(p.backoff_base_ms, 500);
    }

    #[test]
    fn backoff_doubles_and_honors_retry_after() {
        let p = policy(3);
        let unavailable = OracleError::Unavailable("503".into());
        assert_eq!(p.delay_for(1, &unavailable), Duration::from_millis(10));
        assert_eq!(p.delay_for(2, &unavailable), Duration::from_millis(20));
        assert_eq!(p.delay_for(3, &unavailable), Duration::from_millis(40));

        let limited = OracleError::RateLimited {
            retry_after_ms: Some(250),
        };
        assert_eq!(p.delay_for(1, &limited), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let inner = ScriptedOracle::new().on(
            OracleTask::Classify,
            None,
            ScriptedReply::FailThen {
                times: 2,
                error: OracleError::Unavailable("502".into()),
                text: "Answer: yes".into(),
            },
        );
        let oracle = RetryingOracle::new(inner, policy(2));

        let text = oracle.complete(&request()).await.unwrap();
        assert_eq!(text, "Answer: yes");
        assert_eq!(oracle.inner().total_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhaustion_is_reported() {
        let inner = ScriptedOracle::new().on(
            OracleTask::Classify,
            None,
            ScriptedReply::Error(OracleError::RateLimited {
                retry_after_ms: None,
            }),
        );
        let oracle = RetryingOracle::new(inner, policy(1));

        let err = oracle.complete(&request()).await.unwrap_err();
        assert!(matches!(err, OracleError::Exhausted { attempts: 2, .. }));
        assert_eq!(oracle.inner().total_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let inner = ScriptedOracle::new().on(
            OracleTask::Classify,
            None,
            ScriptedReply::Error(OracleError::Rejected {
                status: 400,
                body: "bad request".into(),
            }),
        );
        let oracle = RetryingOracle::new(inner, policy(5));

        let err = oracle.complete(&request()).await.unwrap_err();
        assert!(matches!(err, OracleError::Rejected { status: 400, .. }));
        assert_eq!(oracle.inner().total_calls(), 1);
    }

    struct Stalled;

    #[async_trait]
    impl Oracle for Stalled {
        async fn complete(&self, _request: &OracleRequest) -> OracleResult<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("late".into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out() {
        let oracle = RetryingOracle::new(Stalled, policy(0));
        let err = oracle.complete(&request()).await.unwrap_err();
        match err {
            OracleError::Exhausted { attempts, reason } => {
                assert_eq!(attempts, 1);
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
