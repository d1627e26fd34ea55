//! # Health Endpoint
//!
//! Axum router exposing the aggregated health report to operators and load
//! balancers.
//!
//! ## Routes
//!
//! - `GET /health`: aggregated status, 200 when healthy and 503 otherwise
//! - `GET /health/live`: liveness, always 200 while the process serves

pub mod handlers;
pub mod state;

use axum::routing::get;
use axum::Router;

pub use handlers::health::{build_health_report, HealthCheck, HealthReport, HealthReportMetrics};
pub use state::HealthState;

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/health/live", get(handlers::health::liveness))
        .with_state(state)
}
