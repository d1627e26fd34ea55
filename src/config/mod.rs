//! # Workguard Configuration
//!
//! Environment-level configuration loaded once at process start and immutable
//! thereafter.
//!
//! ## Architecture
//!
//! - **Layered sources**: built-in defaults < optional TOML file < environment
//! - **Environment overrides**: `WORKGUARD__<SECTION>__<FIELD>`, e.g.
//!   `WORKGUARD__TIMEOUTS__DATABASE_MS=2000`
//! - **Explicit validation**: zero budgets and empty namespaces are rejected
//! - **Process-wide instance**: [`GuardConfig::global`] hands out a `&'static`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use workguard_core::config::GuardConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Reads WORKGUARD_CONFIG_PATH (if set) and WORKGUARD__* variables
//! let config = GuardConfig::load()?;
//! let database_budget = config.timeouts.database();
//! let metrics_on = config.telemetry.metrics_enabled;
//! # Ok(())
//! # }
//! ```

pub mod error;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

pub use error::{ConfigResult, ConfigurationError};

/// Environment variable naming an optional TOML configuration file
pub const CONFIG_PATH_ENV: &str = "WORKGUARD_CONFIG_PATH";

static GLOBAL_CONFIG: OnceLock<GuardConfig> = OnceLock::new();

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GuardConfig {
    /// Coordination store endpoint and key namespace
    pub store: StoreConfig,

    /// Per-operation-class timeout budgets
    pub timeouts: TimeoutConfig,

    /// Log verbosity and metrics toggle
    pub telemetry: TelemetryConfig,

    /// Job-slot and sink tuning
    pub backpressure: BackpressureConfig,
}

/// Coordination store connection settings
///
/// A missing `rest_url` or `rest_token` is not a load error: the store reports
/// itself unavailable at call time and every component fails open.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub rest_url: Option<String>,
    pub rest_token: Option<String>,
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            rest_url: None,
            rest_token: None,
            namespace: crate::store::DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl StoreConfig {
    pub fn is_configured(&self) -> bool {
        self.rest_url.as_deref().is_some_and(|url| !url.is_empty())
            && self.rest_token.as_deref().is_some_and(|token| !token.is_empty())
    }
}

/// Timeout budgets in milliseconds
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub dictionary_import_ms: u64,
    pub corpus_annotation_ms: u64,
    pub database_ms: u64,
    pub http_ms: u64,
    pub store_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            dictionary_import_ms: 5 * 60 * 1_000,
            corpus_annotation_ms: 10 * 60 * 1_000,
            database_ms: 10_000,
            http_ms: 30_000,
            store_ms: 5_000,
        }
    }
}

impl TimeoutConfig {
    pub fn dictionary_import(&self) -> Duration {
        Duration::from_millis(self.dictionary_import_ms)
    }

    pub fn corpus_annotation(&self) -> Duration {
        Duration::from_millis(self.corpus_annotation_ms)
    }

    pub fn database(&self) -> Duration {
        Duration::from_millis(self.database_ms)
    }

    pub fn http(&self) -> Duration {
        Duration::from_millis(self.http_ms)
    }

    pub fn store(&self) -> Duration {
        Duration::from_millis(self.store_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        let budgets = [
            ("timeouts.dictionary_import_ms", self.dictionary_import_ms),
            ("timeouts.corpus_annotation_ms", self.corpus_annotation_ms),
            ("timeouts.database_ms", self.database_ms),
            ("timeouts.http_ms", self.http_ms),
            ("timeouts.store_ms", self.store_ms),
        ];
        for (field, value) in budgets {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value,
                    "timeout budget must be greater than 0",
                ));
            }
        }
        Ok(())
    }
}

/// Logging and metrics settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Overrides LOG_LEVEL / RUST_LOG when set
    pub log_level: Option<String>,
    pub json_logs: bool,
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: None,
            json_logs: false,
            metrics_enabled: true,
        }
    }
}

/// Job-slot and best-effort sink tuning
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BackpressureConfig {
    /// TTL for the active-job counter and every per-slot key
    pub job_slot_ttl_seconds: u64,
    /// Queue capacity of the best-effort metrics sink
    pub sink_capacity: usize,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            job_slot_ttl_seconds: 300,
            sink_capacity: 256,
        }
    }
}

impl BackpressureConfig {
    pub fn job_slot_ttl(&self) -> Duration {
        Duration::from_secs(self.job_slot_ttl_seconds)
    }
}

impl GuardConfig {
    /// Load from `WORKGUARD_CONFIG_PATH` (optional) and `WORKGUARD__*` variables
    pub fn load() -> ConfigResult<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => Self::load_from(Some(path)),
            _ => Self::load_from(None::<&Path>),
        }
    }

    /// Load with an explicit (optional) TOML file; environment still applies
    pub fn load_from<P: AsRef<Path>>(path: Option<P>) -> ConfigResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            let path = path.as_ref();
            if !path.exists() {
                return Err(ConfigurationError::ConfigFileNotFound {
                    path: path.to_path_buf(),
                });
            }
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix("WORKGUARD")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: GuardConfig = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.store.namespace.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "store.namespace",
                &self.store.namespace,
                "namespace must not be empty",
            ));
        }
        if self.store.namespace.contains(char::is_whitespace) {
            return Err(ConfigurationError::invalid_value(
                "store.namespace",
                &self.store.namespace,
                "namespace must not contain whitespace",
            ));
        }
        self.timeouts.validate()?;
        if self.backpressure.job_slot_ttl_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "backpressure.job_slot_ttl_seconds",
                0,
                "slot TTL is the crash-recovery mechanism and must be greater than 0",
            ));
        }
        if self.backpressure.sink_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "backpressure.sink_capacity",
                0,
                "sink capacity must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Install the process-wide configuration. Fails if one is already set.
    pub fn install(config: GuardConfig) -> ConfigResult<&'static GuardConfig> {
        config.validate()?;
        GLOBAL_CONFIG
            .set(config)
            .map_err(|_| ConfigurationError::AlreadyInitialized)?;
        Ok(Self::global())
    }

    /// Process-wide configuration, loaded on first access.
    ///
    /// A load failure falls back to defaults so a bad override never takes a
    /// worker down.
    pub fn global() -> &'static GuardConfig {
        GLOBAL_CONFIG.get_or_init(|| match GuardConfig::load() {
            Ok(config) => config,
            Err(error) => {
                warn!(error = %error, "Falling back to default workguard configuration");
                GuardConfig::default()
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_call_class_budgets() {
        let config = GuardConfig::default();
        assert_eq!(config.timeouts.dictionary_import(), Duration::from_secs(300));
        assert_eq!(config.timeouts.corpus_annotation(), Duration::from_secs(600));
        assert_eq!(config.timeouts.database(), Duration::from_secs(10));
        assert_eq!(config.timeouts.http(), Duration::from_secs(30));
        assert_eq!(config.backpressure.job_slot_ttl(), Duration::from_secs(300));
        assert!(config.telemetry.metrics_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[store]
namespace = "corpus"
rest_url = "https://store.example.com"
rest_token = "secret"

[timeouts]
corpus_annotation_ms = 120000

[telemetry]
metrics_enabled = false
"#
        )
        .unwrap();

        let config = GuardConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.store.namespace, "corpus");
        assert!(config.store.is_configured());
        assert_eq!(config.timeouts.corpus_annotation(), Duration::from_secs(120));
        assert_eq!(config.timeouts.dictionary_import(), Duration::from_secs(300));
        assert!(!config.telemetry.metrics_enabled);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = GuardConfig::load_from(Some("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigurationError::ConfigFileNotFound { .. }));
    }

    #[test]
    fn test_environment_override() {
        std::env::set_var("WORKGUARD__TIMEOUTS__HTTP_MS", "1500");
        let config = GuardConfig::load_from(None::<&Path>).unwrap();
        std::env::remove_var("WORKGUARD__TIMEOUTS__HTTP_MS");
        assert_eq!(config.timeouts.http(), Duration::from_millis(1500));
    }

    #[test]
    fn test_validation_rejects_zero_budgets() {
        let mut config = GuardConfig::default();
        config.timeouts.database_ms = 0;
        assert!(config.validate().is_err());

        let mut config = GuardConfig::default();
        config.store.namespace = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = GuardConfig::default();
        config.backpressure.job_slot_ttl_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unconfigured_store() {
        let store = StoreConfig::default();
        assert!(!store.is_configured());
        let store = StoreConfig {
            rest_url: Some("https://x".into()),
            rest_token: Some(String::new()),
            ..Default::default()
        };
        assert!(!store.is_configured());
    }
}
