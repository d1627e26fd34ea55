//! # Rate Limiter
//!
//! Per-identifier sliding-window request counting in the coordination store.
//! Each identifier owns a sorted set of `(timestamp, nonce)` entries; a check
//! prunes entries older than the window, records the current request, counts
//! what is left and refreshes the set's TTL, all in one pipeline.
//!
//! The limiter fails open: when the store is unreachable or not configured,
//! every request is allowed with its full quota.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use workguard_core::clock::SystemClock;
//! use workguard_core::rate_limit::{RateLimitPreset, RateLimiter};
//! use workguard_core::store::{InMemoryCoordinationStore, StoreKeys};
//!
//! # async fn example() {
//! let clock = SystemClock::shared();
//! let store = Arc::new(InMemoryCoordinationStore::new(clock.clone()));
//! let limiter = RateLimiter::new(store, StoreKeys::default(), clock);
//!
//! let result = limiter
//!     .check_rate_limit("user:42", &RateLimitPreset::Strict.config())
//!     .await;
//! assert!(result.success);
//! assert_eq!(result.remaining, 4);
//! # }
//! ```

use crate::clock::SharedClock;
use crate::errors::{StoreError, StoreResult};
use crate::store::{SharedStore, StoreCommand, StoreKeys};
use crate::telemetry::metrics;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Quota for one identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    fn window_ms(&self) -> i64 {
        self.window.as_millis().min(i64::MAX as u128) as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitPreset {
    /// 5 requests per minute
    Strict,
    /// 20 requests per minute
    Normal,
    /// 100 requests per minute
    Relaxed,
    /// 10 requests per hour, for expensive operations
    Heavy,
}

impl RateLimitPreset {
    pub const fn config(&self) -> RateLimitConfig {
        match self {
            RateLimitPreset::Strict => RateLimitConfig {
                max_requests: 5,
                window: Duration::from_secs(60),
            },
            RateLimitPreset::Normal => RateLimitConfig {
                max_requests: 20,
                window: Duration::from_secs(60),
            },
            RateLimitPreset::Relaxed => RateLimitConfig {
                max_requests: 100,
                window: Duration::from_secs(60),
            },
            RateLimitPreset::Heavy => RateLimitConfig {
                max_requests: 10,
                window: Duration::from_secs(3600),
            },
        }
    }
}

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitResult {
    pub success: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch millis at which a rejected caller may retry
    pub reset: i64,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: SharedStore,
    keys: StoreKeys,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(store: SharedStore, keys: StoreKeys, clock: SharedClock) -> Self {
        Self { store, keys, clock }
    }

    /// Count this request against `identifier` and decide whether it may proceed
    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        config: &RateLimitConfig,
    ) -> RateLimitResult {
        let now = self.clock.now_millis();
        let reset = now.saturating_add(config.window_ms());

        match self.record_request(identifier, config, now).await {
            Ok(count) if count > i64::from(config.max_requests) => {
                debug!(
                    identifier,
                    count,
                    limit = config.max_requests,
                    "Rate limit exceeded"
                );
                metrics::record_rate_limit_decision("rejected");
                RateLimitResult {
                    success: false,
                    limit: config.max_requests,
                    remaining: 0,
                    reset,
                }
            }
            Ok(count) => {
                metrics::record_rate_limit_decision("allowed");
                RateLimitResult {
                    success: true,
                    limit: config.max_requests,
                    remaining: config.max_requests.saturating_sub(count.max(0) as u32),
                    reset,
                }
            }
            Err(err) => {
                if err.is_unavailable() {
                    warn!(identifier, error = %err, "Rate limiter failing open, store unavailable");
                } else {
                    error!(identifier, error = %err, "Rate limiter failing open on store error");
                }
                metrics::record_rate_limit_decision("fail_open");
                RateLimitResult {
                    success: true,
                    limit: config.max_requests,
                    remaining: config.max_requests,
                    reset,
                }
            }
        }
    }

    /// Returns the in-window count including this request
    async fn record_request(
        &self,
        identifier: &str,
        config: &RateLimitConfig,
        now: i64,
    ) -> StoreResult<i64> {
        let key = self.keys.rate_limit(identifier);
        let nonce = format!("{now}-{}", Uuid::new_v4());
        let window_ms = config.window_ms();

        let replies = self
            .store
            .pipeline(vec![
                StoreCommand::zremrangebyscore(&key, 0, now.saturating_sub(window_ms)),
                StoreCommand::zadd(&key, now, &nonce),
                StoreCommand::zcard(&key),
                StoreCommand::pexpire(&key, window_ms.max(1) as u64),
            ])
            .await?;

        let count = replies
            .into_iter()
            .nth(2)
            .ok_or_else(|| StoreError::UnexpectedReply {
                command: "ZCARD".to_string(),
                reply: "missing pipeline reply".to_string(),
            })?
            .into_int("ZCARD")?;

        if count > i64::from(config.max_requests) {
            // Rejected requests do not consume quota
            if let Err(err) = self.store.execute(StoreCommand::zrem(&key, &nonce)).await {
                debug!(identifier, error = %err, "Failed to drop rejected rate-limit entry");
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, MockClock};
    use crate::store::InMemoryCoordinationStore;
    use std::sync::Arc;

    fn limiter() -> (RateLimiter, Arc<MockClock>, Arc<InMemoryCoordinationStore>) {
        let clock = MockClock::shared();
        let store = Arc::new(InMemoryCoordinationStore::new(clock.clone()));
        let limiter = RateLimiter::new(store.clone(), StoreKeys::default(), clock.clone());
        (limiter, clock, store)
    }

    #[test]
    fn test_presets() {
        assert_eq!(RateLimitPreset::Strict.config().max_requests, 5);
        assert_eq!(RateLimitPreset::Normal.config().max_requests, 20);
        assert_eq!(RateLimitPreset::Relaxed.config().max_requests, 100);
        assert_eq!(
            RateLimitPreset::Heavy.config(),
            RateLimitConfig::new(10, Duration::from_secs(3600))
        );
    }

    #[tokio::test]
    async fn test_remaining_counts_down() {
        let (limiter, clock, _) = limiter();
        let config = RateLimitPreset::Strict.config();

        for expected in (0..5).rev() {
            let result = limiter.check_rate_limit("ip:1", &config).await;
            assert!(result.success);
            assert_eq!(result.remaining, expected);
            clock.advance(Duration::from_millis(10));
        }
    }

    #[tokio::test]
    async fn test_identifiers_are_independent() {
        let (limiter, _, _) = limiter();
        let config = RateLimitConfig::new(1, Duration::from_secs(60));

        assert!(limiter.check_rate_limit("a", &config).await.success);
        assert!(!limiter.check_rate_limit("a", &config).await.success);
        assert!(limiter.check_rate_limit("b", &config).await.success);
    }

    #[tokio::test]
    async fn test_window_key_carries_ttl() {
        let (limiter, _, store) = limiter();
        limiter
            .check_rate_limit("ip:1", &RateLimitPreset::Normal.config())
            .await;
        let ttl = store
            .pttl(&StoreKeys::default().rate_limit("ip:1"))
            .expect("ttl set");
        assert!(ttl > 0 && ttl <= 60_000);
    }

    #[tokio::test]
    async fn test_fails_open_when_store_unavailable() {
        let (limiter, clock, store) = limiter();
        store.set_unavailable(true);
        let config = RateLimitPreset::Strict.config();

        let result = limiter.check_rate_limit("ip:1", &config).await;
        assert_eq!(
            result,
            RateLimitResult {
                success: true,
                limit: 5,
                remaining: 5,
                reset: clock.now_millis() + 60_000,
            }
        );
    }
}
