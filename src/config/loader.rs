//! Configuration Loader
//!
//! Environment-aware loading: `reconciler.toml`, then `reconciler.<environment>.toml`,
//! then `RECONCILER__SECTION__FIELD` environment variables. `DATABASE_URL` and
//! `SOURCE_DATABASE_URL` override the connection strings last, so deployment
//! platforms that only inject those keep working.

use super::error::{ConfigResult, ConfigurationError};
use super::ReconcilerConfig;
use ::config::{Config, Environment, File};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE_STEM: &str = "reconciler";
const ENV_PREFIX: &str = "RECONCILER";

/// Loaded, validated configuration plus where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: ReconcilerConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let process_env: HashMap<String, String> = env::vars().collect();
        Self::load_with_env_source(config_dir, environment, process_env)
    }

    /// Load using an explicit variable map instead of the process environment
    pub fn load_with_env_source(
        config_dir: Option<PathBuf>,
        environment: &str,
        env_source: HashMap<String, String>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = environment,
            config_directory = %config_directory.display(),
            "Loading configuration"
        );

        let base_path = config_directory.join(format!("{BASE_FILE_STEM}.toml"));
        let env_path = config_directory.join(format!("{BASE_FILE_STEM}.{environment}.toml"));

        let layered = Config::builder()
            .add_source(File::from(base_path.as_path()).required(false))
            .add_source(File::from(env_path.as_path()).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("jobs.excluded_requirement_types")
                    .source(Some(env_source.clone())),
            )
            .build()?;

        let mut config: ReconcilerConfig = layered.try_deserialize()?;
        Self::apply_url_overrides(&mut config, |key| env_source.get(key).cloned());

        config.validate()?;

        debug!(
            config = %Self::sanitize_config_for_logging(&config),
            "Configuration loaded"
        );
        info!(
            environment = environment,
            batch_size = config.jobs.default_batch_size,
            budget_ms = config.jobs.max_execution_time_ms,
            circuit_breakers_enabled = config.circuit_breakers.enabled,
            "⚙️ Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration (tests, embedding)
    pub fn from_config(config: ReconcilerConfig, environment: &str) -> ConfigResult<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            environment: environment.to_string(),
            config_directory: Self::default_config_directory(),
        }))
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration as JSON with credentials masked, safe for logs
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    fn apply_url_overrides<F>(config: &mut ReconcilerConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL").filter(|url| !url.is_empty()) {
            config.database.local_url = url;
        }
        if let Some(url) = lookup("SOURCE_DATABASE_URL").filter(|url| !url.is_empty()) {
            config.database.source_url = url;
        }
    }

    /// Detect current environment: RECONCILER_ENV || APP_ENV || 'development'
    fn detect_environment() -> String {
        env::var("RECONCILER_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn default_config_directory() -> PathBuf {
        env::var("RECONCILER_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn sanitize_config_for_logging(config: &ReconcilerConfig) -> serde_json::Value {
        let mut config_json = serde_json::json!(config);
        Self::sanitize_json_recursive(&mut config_json);
        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    if key_lower.ends_with("url") {
                        if let Some(url) = val.as_str() {
                            let masked = mask_url_credentials(url);
                            *val = serde_json::Value::String(masked);
                        }
                    } else if ["password", "secret", "token"]
                        .iter()
                        .any(|pattern| key_lower.contains(pattern))
                    {
                        *val = serde_json::Value::String("[MASKED]".to_string());
                    } else {
                        Self::sanitize_json_recursive(val);
                    }
                }
            }
            serde_json::Value::Array(items) => {
                for item in items.iter_mut() {
                    Self::sanitize_json_recursive(item);
                }
            }
            _ => {}
        }
    }
}

/// Replace the `user:password@` part of a connection string
fn mask_url_credentials(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
