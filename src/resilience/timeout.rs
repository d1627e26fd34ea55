//! # Timeouts and Retries
//!
//! Every external call runs inside a bounded time budget chosen by its
//! [`OperationClass`]. An elapsed budget becomes [`GuardError::Timeout`], which
//! callers classify exactly like a downstream failure.

use crate::config::TimeoutConfig;
use crate::errors::{GuardError, GuardResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Class of external call, each with its own budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    DictionaryImport,
    CorpusAnnotation,
    Database,
    Http,
    Store,
}

impl OperationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::DictionaryImport => "dictionary_import",
            OperationClass::CorpusAnnotation => "corpus_annotation",
            OperationClass::Database => "database",
            OperationClass::Http => "http",
            OperationClass::Store => "store",
        }
    }

    /// Budget for this class under the given configuration
    pub fn budget(&self, timeouts: &TimeoutConfig) -> Duration {
        match self {
            OperationClass::DictionaryImport => timeouts.dictionary_import(),
            OperationClass::CorpusAnnotation => timeouts.corpus_annotation(),
            OperationClass::Database => timeouts.database(),
            OperationClass::Http => timeouts.http(),
            OperationClass::Store => timeouts.store(),
        }
    }
}

/// Run `future` within the class budget from `timeouts`
pub async fn with_timeout<T, Fut>(
    class: OperationClass,
    timeouts: &TimeoutConfig,
    future: Fut,
) -> GuardResult<T>
where
    Fut: Future<Output = GuardResult<T>>,
{
    with_budget(class, class.budget(timeouts), future).await
}

/// Run `future` within an explicit budget, labelled with `class`
pub async fn with_budget<T, Fut>(class: OperationClass, budget: Duration, future: Fut) -> GuardResult<T>
where
    Fut: Future<Output = GuardResult<T>>,
{
    match tokio::time::timeout(budget, future).await {
        Ok(result) => result,
        Err(_elapsed) => {
            warn!(
                operation_class = class.as_str(),
                budget_ms = budget.as_millis() as u64,
                "Operation exceeded its time budget"
            );
            Err(GuardError::Timeout(format!(
                "{} operation timed out after {}ms",
                class.as_str(),
                budget.as_millis()
            )))
        }
    }
}

/// Exponential backoff schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(retry);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Retry `operation` on retryable errors (timeouts, store unavailability, database errors)
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> GuardResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GuardResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < attempts && is_retryable(&err) => {
                let delay = policy.delay_for(attempt);
                debug!(
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn is_retryable(err: &GuardError) -> bool {
    matches!(
        err,
        GuardError::Timeout(_) | GuardError::StoreUnavailable(_) | GuardError::Database(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_class_budgets_follow_config() {
        let mut timeouts = TimeoutConfig::default();
        assert_eq!(
            OperationClass::CorpusAnnotation.budget(&timeouts),
            Duration::from_secs(600)
        );
        timeouts.database_ms = 250;
        assert_eq!(
            OperationClass::Database.budget(&timeouts),
            Duration::from_millis(250)
        );
    }

    #[tokio::test]
    async fn test_timeout_has_distinguishing_message() {
        let err = with_budget(OperationClass::Http, Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, GuardError>(())
        })
        .await
        .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Timeout error: http operation timed out after 5ms");
    }

    #[test]
    fn test_backoff_schedule_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff(&RetryPolicy::default(), || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(GuardError::StoreUnavailable("blip".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let attempts = AtomicU32::new(0);
        let result: GuardResult<()> = retry_with_backoff(&RetryPolicy::default(), || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(GuardError::Configuration("bad".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
