//! # Structured Logging Module
//!
//! Environment-aware structured logging for worker processes. Console output is
//! human-readable by default and JSON when `telemetry.json_logs` is set, so log
//! aggregators can index the structured fields every component emits.
//!
//! Level precedence: `telemetry.log_level`, then `LOG_LEVEL`, then `RUST_LOG`,
//! then a default derived from `WORKGUARD_ENV` / `APP_ENV`.

use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{GuardConfig, TelemetryConfig};
use crate::telemetry::metrics;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize logging from the global configuration
pub fn init_tracing() {
    init_with(&GuardConfig::global().telemetry);
}

/// Initialize logging with explicit telemetry settings. Later calls are no-ops.
pub fn init_with(telemetry: &TelemetryConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(
            &environment,
            telemetry.log_level.as_deref(),
            std::env::var("LOG_LEVEL").ok().as_deref(),
            std::env::var("RUST_LOG").ok().as_deref(),
        );
        metrics::set_metrics_enabled(telemetry.metrics_enabled);

        let console_layer = if telemetry.json_logs {
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(false)
                .with_filter(EnvFilter::new(&log_level))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(std::io::stdout().is_terminal())
                .with_filter(EnvFilter::new(&log_level))
                .boxed()
        };

        // A host process may already own the global subscriber
        if tracing_subscriber::registry()
            .with(console_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            environment = %environment,
            log_level = %log_level,
            json = telemetry.json_logs,
            metrics_enabled = telemetry.metrics_enabled,
            "Logging initialized"
        );
    });
}

/// Console-only debug logging for tests and local tools
pub fn init_console_only() {
    init_with(&TelemetryConfig {
        log_level: Some("debug".to_string()),
        json_logs: false,
        metrics_enabled: false,
    });
}

/// Current environment from `WORKGUARD_ENV` or `APP_ENV`
pub fn get_environment() -> String {
    std::env::var("WORKGUARD_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Resolve the filter directive from the configured override, `LOG_LEVEL`,
/// `RUST_LOG` and finally the environment default
pub fn get_log_level(
    environment: &str,
    configured: Option<&str>,
    log_level_env: Option<&str>,
    rust_log_env: Option<&str>,
) -> String {
    [configured, log_level_env, rust_log_env]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|level| !level.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| match environment {
            "production" => "info".to_string(),
            _ => "debug".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test", None, None, None), "debug");
        assert_eq!(get_log_level("development", None, None, None), "debug");
        assert_eq!(get_log_level("production", None, None, None), "info");
        assert_eq!(get_log_level("unknown", None, None, None), "debug");
    }

    #[test]
    fn test_log_level_precedence() {
        assert_eq!(
            get_log_level("production", Some("warn"), Some("trace"), Some("error")),
            "warn"
        );
        assert_eq!(
            get_log_level("production", None, Some("trace"), Some("error")),
            "trace"
        );
        assert_eq!(
            get_log_level("production", Some("  "), None, Some("workguard_core=debug")),
            "workguard_core=debug"
        );
    }

    #[test]
    fn test_init_is_idempotent() {
        init_console_only();
        init_console_only();
    }
}
