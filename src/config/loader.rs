//! Configuration Loader
//!
//! Layered configuration loading: a base file, an optional environment override file
//! next to it, then `ENGINE_GATEWAY__SECTION__KEY` environment variables.

use super::error::{ConfigResult, ConfigurationError};
use super::GatewayConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Prefix of environment variable overrides
pub const ENV_PREFIX: &str = "ENGINE_GATEWAY";

/// Separator between prefix, section and key in environment variable overrides
pub const ENV_SEPARATOR: &str = "__";

/// Loaded and validated gateway configuration
#[derive(Debug)]
pub struct ConfigManager {
    config: GatewayConfig,
    environment: String,
    source_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration from a file using the detected environment
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_file(path, &environment)
    }

    /// Load configuration from a file with an explicit environment.
    ///
    /// `config/gateway.yaml` loaded for `production` is overlaid with
    /// `config/gateway.production.yaml` when that file exists.
    pub fn load_from_file<P: AsRef<Path>>(
        path: P,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigurationError::config_file_not_found(path));
        }

        debug!(
            environment = %environment,
            path = %path.display(),
            "Loading gateway configuration"
        );

        let mut builder = Config::builder().add_source(File::from(path).required(true));

        if let Some(override_path) = Self::environment_override_path(path, environment) {
            debug!(
                override_path = %override_path.display(),
                "Applying environment override file"
            );
            builder = builder.add_source(File::from(override_path).required(false));
        }

        let layered = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("hubs.urls"),
            )
            .build()
            .map_err(|e| ConfigurationError::load_error(path.display().to_string(), e))?;

        let config: GatewayConfig = layered
            .try_deserialize()
            .map_err(|e| ConfigurationError::load_error(path.display().to_string(), e))?;

        config.validate()?;

        let manager = ConfigManager {
            config,
            environment: environment.to_string(),
            source_path: Some(path.to_path_buf()),
        };

        debug!(
            "Configuration loaded: {}",
            serde_json::to_string_pretty(&manager.sanitized())
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );

        info!(
            environment = %environment,
            engine = %manager.config.engine.name,
            hubs = manager.config.hubs.urls.len(),
            "⚙️ Configuration loaded successfully"
        );

        Ok(Arc::new(manager))
    }

    /// Wrap an in-memory configuration after validating it
    pub fn from_config(config: GatewayConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            source_path: None,
        }))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// File the configuration was loaded from, if any
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// JSON view of the configuration with sensitive-looking fields masked
    pub fn sanitized(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null);
        let sensitive_patterns = ["password", "secret", "token", "credential", "auth", "api_key"];
        sanitize_json_recursive(&mut value, &sensitive_patterns);
        value
    }

    /// Current environment from `ENGINE_GATEWAY_ENV`, then `APP_ENV`
    pub fn detect_environment() -> String {
        env::var("ENGINE_GATEWAY_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn environment_override_path(path: &Path, environment: &str) -> Option<PathBuf> {
        let stem = path.file_stem()?.to_str()?;
        let extension = path.extension()?.to_str()?;
        let candidate = path.with_file_name(format!("{stem}.{environment}.{extension}"));
        candidate.exists().then_some(candidate)
    }
}

/// Mask values whose key looks sensitive; hub URLs may embed credentials in the userinfo part
fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let key_lower = key.to_lowercase();
                let is_sensitive = sensitive_patterns
                    .iter()
                    .any(|pattern| key_lower.contains(pattern));

                if is_sensitive {
                    *val = match val {
                        serde_json::Value::String(s) if s.is_empty() => {
                            serde_json::Value::String("[EMPTY]".to_string())
                        }
                        serde_json::Value::String(s) => {
                            let masked = if s.len() > 4 {
                                format!("{}***{}", &s[..2], &s[s.len() - 2..])
                            } else {
                                "***".to_string()
                            };
                            serde_json::Value::String(format!("[MASKED: {masked}]"))
                        }
                        _ => serde_json::Value::String("[MASKED]".to_string()),
                    };
                } else {
                    sanitize_json_recursive(val, sensitive_patterns);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                sanitize_json_recursive(item, sensitive_patterns);
            }
        }
        serde_json::Value::String(s) => {
            if let Some(masked) = mask_url_userinfo(s) {
                *s = masked;
            }
        }
        _ => {}
    }
}

fn mask_url_userinfo(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let (authority, path) = rest.split_at(authority_end);
    let (_, host) = authority.rsplit_once('@')?;
    Some(format!("{scheme}://***@{host}{path}"))
}
