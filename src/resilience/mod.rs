//! # Resilience Module
//!
//! Fault tolerance for calls leaving the process: circuit breakers per
//! downstream service, time budgets per operation class, and retry with
//! exponential backoff.
//!
//! ## Architecture
//!
//! - **Circuit Breakers**: Closed / Open / Half-Open state machine with optional fallback
//! - **Registry**: one breaker per service name for the process lifetime
//! - **Presets**: CRITICAL (3 failures, 30s), NORMAL (5, 60s), RELAXED (10, 120s)
//! - **Timeouts**: bounded budgets; an elapsed budget is a failure
//!
//! ## Usage
//!
//! ```rust
//! use workguard_core::resilience::{CircuitBreakerPreset, CircuitBreakerRegistry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = CircuitBreakerRegistry::global();
//! let breaker = registry.get_or_create("dictionary_api", CircuitBreakerPreset::Normal);
//!
//! let entries = breaker
//!     .call_with_fallback(
//!         || async { Ok::<_, std::io::Error>(vec!["fresh"]) },
//!         || async { Ok::<_, std::io::Error>(vec!["cached"]) },
//!     )
//!     .await?;
//! assert_eq!(entries, vec!["fresh"]);
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod metrics;
pub mod registry;
pub mod timeout;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::{CircuitBreakerConfig, CircuitBreakerPreset};
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
pub use registry::CircuitBreakerRegistry;
pub use timeout::{retry_with_backoff, with_budget, with_timeout, OperationClass, RetryPolicy};
