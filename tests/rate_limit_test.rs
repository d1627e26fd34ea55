use std::sync::Arc;
use std::time::Duration;

use workguard_core::clock::{Clock, MockClock};
use workguard_core::rate_limit::{RateLimitConfig, RateLimiter};
use workguard_core::store::{InMemoryCoordinationStore, StoreKeys};

fn limiter() -> (RateLimiter, Arc<MockClock>) {
    let clock = MockClock::shared();
    let store = Arc::new(InMemoryCoordinationStore::new(clock.clone()));
    (
        RateLimiter::new(store, StoreKeys::default(), clock.clone()),
        clock,
    )
}

#[tokio::test]
async fn test_sixth_request_in_window_is_rejected() {
    let (limiter, clock) = limiter();
    let config = RateLimitConfig::new(5, Duration::from_secs(60));

    for _ in 0..5 {
        assert!(limiter.check_rate_limit("user:7", &config).await.success);
        clock.advance(Duration::from_secs(1));
    }

    let rejected = limiter.check_rate_limit("user:7", &config).await;
    assert!(!rejected.success);
    assert_eq!(rejected.remaining, 0);
    assert_eq!(rejected.limit, 5);
    assert_eq!(rejected.reset, clock.now_millis() + 60_000);
}

#[tokio::test]
async fn test_window_elapses_and_quota_returns() {
    let (limiter, clock) = limiter();
    let config = RateLimitConfig::new(5, Duration::from_secs(60));

    for _ in 0..6 {
        limiter.check_rate_limit("user:7", &config).await;
    }
    assert!(!limiter.check_rate_limit("user:7", &config).await.success);

    clock.advance(Duration::from_secs(60));
    let result = limiter.check_rate_limit("user:7", &config).await;
    assert!(result.success);
    assert_eq!(result.remaining, 4);
}

#[tokio::test]
async fn test_window_slides_rather_than_resets() {
    let (limiter, clock) = limiter();
    let config = RateLimitConfig::new(2, Duration::from_secs(10));

    assert!(limiter.check_rate_limit("ip", &config).await.success);
    clock.advance(Duration::from_secs(6));
    assert!(limiter.check_rate_limit("ip", &config).await.success);
    assert!(!limiter.check_rate_limit("ip", &config).await.success);

    // First request leaves the window, second is still inside it
    clock.advance(Duration::from_secs(5));
    let result = limiter.check_rate_limit("ip", &config).await;
    assert!(result.success);
    assert_eq!(result.remaining, 0);
    assert!(!limiter.check_rate_limit("ip", &config).await.success);
}
