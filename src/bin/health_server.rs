//! Standalone health endpoint for a worker fleet.
//!
//! Environment:
//! - `DATABASE_URL` (required): database the probe checks
//! - `WORKGUARD_HEALTH_BIND`: listen address, default `0.0.0.0:8080`
//! - `WORKGUARD_CONFIG_PATH` / `WORKGUARD__*`: see [`workguard_core::config`]

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use workguard_core::backpressure::BackpressureController;
use workguard_core::clock::SystemClock;
use workguard_core::config::GuardConfig;
use workguard_core::health::PgHealthProbe;
use workguard_core::logging;
use workguard_core::resilience::{CircuitBreakerPreset, CircuitBreakerRegistry};
use workguard_core::store::RestCoordinationStore;
use workguard_core::web::{self, HealthState};

const DEFAULT_BIND: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GuardConfig::install(GuardConfig::load().context("loading configuration")?)
        .context("installing configuration")?;
    logging::init_tracing();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let bind = std::env::var("WORKGUARD_HEALTH_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(config.timeouts.database())
        .connect_lazy(&database_url)
        .context("creating database pool")?;

    let registry = CircuitBreakerRegistry::global().clone();
    let probe = PgHealthProbe::new(pool, config.timeouts.database())
        .with_circuit_breaker(registry.get_or_create("database", CircuitBreakerPreset::Critical));
    let store = RestCoordinationStore::new(&config.store, config.timeouts.store())
        .context("creating coordination store client")?;

    let controller = BackpressureController::new(
        Arc::new(store),
        Arc::new(probe),
        SystemClock::shared(),
        config,
    );
    let app = web::router(HealthState::new(Arc::new(controller), registry));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(address = %bind, store_configured = config.store.is_configured(), "Health endpoint listening");
    axum::serve(listener, app).await.context("serving health endpoint")?;
    Ok(())
}
