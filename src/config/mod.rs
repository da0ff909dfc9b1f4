//! # Reconciler Configuration System
//!
//! Layered configuration for the reconciliation jobs: a base TOML file, an optional
//! environment-specific override, and `RECONCILER__*` environment variables, merged
//! with the `config` crate and validated before any job runs.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use queue_reconciler::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//!
//! let budget = manager.config().jobs.max_execution_time();
//! let batch_size = manager.config().jobs.default_batch_size;
//! # let _ = (budget, batch_size);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::MAX_LOOKBACK_HOURS;
use crate::resilience;

/// Root configuration structure mirroring `config/reconciler.toml`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Connection settings for the operational database and the local store
    pub database: DatabaseConfig,

    /// Fail-fast guards in front of both databases
    pub circuit_breakers: CircuitBreakerSettings,

    /// Batch job budgets, windows and thresholds
    pub jobs: JobsConfig,

    pub logging: LoggingConfig,
}

/// Database connection and pooling configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Read-only operational database (users, claims, requirements)
    pub source_url: String,
    /// Locally owned scoring/queue store (call scores, conversions, call sessions)
    pub local_url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub statement_timeout_ms: u64,
    /// Apply bundled migrations to the local store on startup
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            source_url: "postgresql://localhost/claims_operational".to_string(),
            local_url: "postgresql://localhost/call_queue_development".to_string(),
            max_connections: 5,
            acquire_timeout_seconds: 5,
            statement_timeout_ms: 10_000,
            run_migrations: false,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

/// File-backed circuit breaker settings, one entry per guarded component
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    pub global_settings: CircuitBreakerGlobalSettings,
    pub default_config: CircuitBreakerComponentConfig,
    pub component_configs: HashMap<String, CircuitBreakerComponentConfig>,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        let mut component_configs = HashMap::new();
        component_configs.insert(
            resilience::SOURCE_DATABASE_COMPONENT.to_string(),
            CircuitBreakerComponentConfig::from(resilience::CircuitBreakerConfig::for_source_database()),
        );
        component_configs.insert(
            resilience::LOCAL_STORE_COMPONENT.to_string(),
            CircuitBreakerComponentConfig::from(resilience::CircuitBreakerConfig::for_local_store()),
        );

        Self {
            enabled: true,
            global_settings: CircuitBreakerGlobalSettings::default(),
            default_config: CircuitBreakerComponentConfig::default(),
            component_configs,
        }
    }
}

impl CircuitBreakerSettings {
    /// Component override if present, default config otherwise
    pub fn config_for_component(&self, component_name: &str) -> &CircuitBreakerComponentConfig {
        self.component_configs
            .get(component_name)
            .unwrap_or(&self.default_config)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerGlobalSettings {
    pub max_circuit_breakers: u32,
}

impl Default for CircuitBreakerGlobalSettings {
    fn default() -> Self {
        Self {
            max_circuit_breakers: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerComponentConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerComponentConfig {
    fn default() -> Self {
        Self::from(resilience::CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerComponentConfig {
    pub fn to_resilience_config(&self) -> resilience::CircuitBreakerConfig {
        resilience::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: Duration::from_secs(self.timeout_seconds),
            half_open_max_calls: self.half_open_max_calls,
        }
    }
}

impl From<resilience::CircuitBreakerConfig> for CircuitBreakerComponentConfig {
    fn from(config: resilience::CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            timeout_seconds: config.timeout.as_secs(),
            half_open_max_calls: config.half_open_max_calls,
        }
    }
}

/// Settings shared by every batch job
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Wall-clock budget checked before each batch; sized to fit a serverless invocation
    pub max_execution_time_ms: u64,
    /// Pause between batches to bound load on the shared databases
    pub inter_batch_delay_ms: u64,
    pub default_batch_size: usize,
    pub new_users_hours_back: i64,
    pub new_requirements_hours_back: i64,
    pub attribution_hours_back: i64,
    pub attribution_lookback_days: i64,
    /// Calls at or below this talk time are not meaningful contact
    pub min_talk_time_seconds: i32,
    /// An existing conversion inside this window suppresses a second one for the same user
    pub duplicate_conversion_window_minutes: i64,
    /// Requirement types that never block onboarding completion
    pub excluded_requirement_types: Vec<String>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_execution_time_ms: 25_000,
            inter_batch_delay_ms: 100,
            default_batch_size: 50,
            new_users_hours_back: 2,
            new_requirements_hours_back: 2,
            attribution_hours_back: 24,
            attribution_lookback_days: 30,
            min_talk_time_seconds: 30,
            duplicate_conversion_window_minutes: 60,
            excluded_requirement_types: crate::constants::DEFAULT_EXCLUDED_REQUIREMENT_TYPES
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }
}

impl JobsConfig {
    pub fn max_execution_time(&self) -> Duration {
        Duration::from_millis(self.max_execution_time_ms)
    }

    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    pub fn duplicate_conversion_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.duplicate_conversion_window_minutes)
    }

    pub fn attribution_lookback(&self) -> chrono::Duration {
        chrono::Duration::days(self.attribution_lookback_days)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Filter directive; `RUST_LOG` still wins when set
    pub level: Option<String>,
}

impl ReconcilerConfig {
    /// Validate configuration consistency
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.source_url.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "source_url",
                "database configuration",
            ));
        }

        if self.database.local_url.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "local_url",
                "database configuration",
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                self.database.max_connections,
                "must be greater than 0",
            ));
        }

        if self.jobs.max_execution_time_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "jobs.max_execution_time_ms",
                self.jobs.max_execution_time_ms,
                "must be greater than 0",
            ));
        }

        if self.jobs.default_batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "jobs.default_batch_size",
                self.jobs.default_batch_size,
                "must be greater than 0",
            ));
        }

        for (field, value, max) in [
            (
                "jobs.new_users_hours_back",
                self.jobs.new_users_hours_back,
                MAX_LOOKBACK_HOURS,
            ),
            (
                "jobs.new_requirements_hours_back",
                self.jobs.new_requirements_hours_back,
                MAX_LOOKBACK_HOURS,
            ),
            (
                "jobs.attribution_hours_back",
                self.jobs.attribution_hours_back,
                MAX_LOOKBACK_HOURS,
            ),
            (
                "jobs.attribution_lookback_days",
                self.jobs.attribution_lookback_days,
                MAX_LOOKBACK_HOURS / 24,
            ),
        ] {
            if value <= 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value,
                    "must be greater than 0",
                ));
            }
            if value > max {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value,
                    format!("must not exceed {max}"),
                ));
            }
        }

        if self.jobs.min_talk_time_seconds < 0 {
            return Err(ConfigurationError::invalid_value(
                "jobs.min_talk_time_seconds",
                self.jobs.min_talk_time_seconds,
                "must not be negative",
            ));
        }

        if self.jobs.duplicate_conversion_window_minutes < 0 {
            return Err(ConfigurationError::invalid_value(
                "jobs.duplicate_conversion_window_minutes",
                self.jobs.duplicate_conversion_window_minutes,
                "must not be negative",
            ));
        }

        if self.jobs.duplicate_conversion_window_minutes > MAX_LOOKBACK_HOURS * 60 {
            return Err(ConfigurationError::invalid_value(
                "jobs.duplicate_conversion_window_minutes",
                self.jobs.duplicate_conversion_window_minutes,
                format!("must not exceed {}", MAX_LOOKBACK_HOURS * 60),
            ));
        }

        let breakers = &self.circuit_breakers;
        for (component, component_config) in std::iter::once(("default", &breakers.default_config))
            .chain(
                breakers
                    .component_configs
                    .iter()
                    .map(|(name, cfg)| (name.as_str(), cfg)),
            )
        {
            component_config
                .to_resilience_config()
                .validate()
                .map_err(|reason| {
                    ConfigurationError::invalid_value(
                        format!("circuit_breakers.{component}"),
                        format!("{component_config:?}"),
                        reason,
                    )
                })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration_is_valid() {
        let config = ReconcilerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.jobs.max_execution_time(), Duration::from_secs(25));
        assert_eq!(config.jobs.inter_batch_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let mut config = ReconcilerConfig::default();
        config.jobs.default_batch_size = 0;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("default_batch_size"));
    }

    #[test]
    fn test_oversized_lookback_is_rejected() {
        let mut config = ReconcilerConfig::default();
        config.jobs.attribution_lookback_days = i64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("attribution_lookback_days"));

        let mut config = ReconcilerConfig::default();
        config.jobs.new_users_hours_back = MAX_LOOKBACK_HOURS + 1;
        assert!(config.validate().is_err());

        let mut config = ReconcilerConfig::default();
        config.jobs.duplicate_conversion_window_minutes = i64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_component_breaker_is_rejected() {
        let mut config = ReconcilerConfig::default();
        config.circuit_breakers.component_configs.insert(
            "source_database".to_string(),
            CircuitBreakerComponentConfig {
                failure_threshold: 0,
                timeout_seconds: 30,
                half_open_max_calls: 1,
            },
        );

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_component_config_falls_back_to_default() {
        let settings = CircuitBreakerSettings::default();

        assert_eq!(
            settings.config_for_component("source_database").failure_threshold,
            5
        );
        assert_eq!(
            settings.config_for_component("unknown").failure_threshold,
            settings.default_config.failure_threshold
        );
    }
}
