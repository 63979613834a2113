use serde::Deserialize;
use std::{collections::HashMap, path::PathBuf};
use crate::errors::ConfigError;

use super::loader::ConfigLoader;

// Configuration location constants
pub const USER_CONFIG_PATH: &str = "~/.config/graft";
pub const CONFIG_FILE_NAME: &str = "container.toml";

// Environment overrides
pub const ENV_MAX_RESOLUTION_DEPTH: &str = "GRAFT_MAX_RESOLUTION_DEPTH";
pub const ENV_COMPILE_CACHE: &str = "GRAFT_COMPILE_CACHE";
pub const ENV_TRACK_TRANSIENTS: &str = "GRAFT_TRACK_TRANSIENTS";
pub const ENV_ROOT_SCOPE_NAME: &str = "GRAFT_ROOT_SCOPE_NAME";
pub const ENV_LOG_LEVEL: &str = "GRAFT_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "GRAFT_LOG_FORMAT";

pub const ENV_KEYS: [&str; 6] = [
    ENV_MAX_RESOLUTION_DEPTH,
    ENV_COMPILE_CACHE,
    ENV_TRACK_TRANSIENTS,
    ENV_ROOT_SCOPE_NAME,
    ENV_LOG_LEVEL,
    ENV_LOG_FORMAT,
];

const DEFAULT_MAX_RESOLUTION_DEPTH: usize = 64;
const DEFAULT_ROOT_SCOPE_NAME: &str = "root";
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 3] = ["pretty", "json", "compact"];

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfig {
    /// 请求树允许的最大深度
    pub max_resolution_depth: usize,
    /// 是否缓存编译后的例程
    pub compile_cache_enabled: bool,
    /// 是否登记瞬态可释放对象
    pub track_disposable_transients: bool,
    pub root_scope_name: String,
    pub logging: Option<LogSettings>,
}

/// Logging section of the configuration file
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Option<String>,
    pub format: Option<String>,
}

/// Partial configuration for loading from files
#[derive(Deserialize, Debug, Default)]
pub struct PartialContainerConfig {
    max_resolution_depth: Option<usize>,
    compile_cache_enabled: Option<bool>,
    track_disposable_transients: Option<bool>,
    root_scope_name: Option<String>,
    logging: Option<LogSettings>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            max_resolution_depth: DEFAULT_MAX_RESOLUTION_DEPTH,
            compile_cache_enabled: true,
            track_disposable_transients: true,
            root_scope_name: DEFAULT_ROOT_SCOPE_NAME.to_string(),
            logging: None,
        }
    }
}

impl ContainerConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load_config()
    }

    /// Load configuration with custom base path (for testing)
    pub fn load_with_base_path(base_path: PathBuf) -> Result<Self, ConfigError> {
        ConfigLoader::with_base_path(base_path).load_config()
    }

    /// Environment values take precedence over file values, file values over defaults
    pub fn from_partial_and_env(
        partial: Option<PartialContainerConfig>,
        env_map: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let partial = partial.unwrap_or_default();
        let defaults = ContainerConfig::default();

        let max_resolution_depth = env_map
            .get(ENV_MAX_RESOLUTION_DEPTH)
            .and_then(|s| s.parse().ok())
            .or(partial.max_resolution_depth)
            .unwrap_or(defaults.max_resolution_depth);

        let compile_cache_enabled = env_map
            .get(ENV_COMPILE_CACHE)
            .and_then(|s| parse_bool(s))
            .or(partial.compile_cache_enabled)
            .unwrap_or(defaults.compile_cache_enabled);

        let track_disposable_transients = env_map
            .get(ENV_TRACK_TRANSIENTS)
            .and_then(|s| parse_bool(s))
            .or(partial.track_disposable_transients)
            .unwrap_or(defaults.track_disposable_transients);

        let root_scope_name = env_map
            .get(ENV_ROOT_SCOPE_NAME)
            .cloned()
            .or(partial.root_scope_name)
            .unwrap_or(defaults.root_scope_name);

        let file_logging = partial.logging.unwrap_or_default();
        let logging = LogSettings {
            level: env_map.get(ENV_LOG_LEVEL).cloned().or(file_logging.level),
            format: env_map.get(ENV_LOG_FORMAT).cloned().or(file_logging.format),
        };
        let logging = if logging == LogSettings::default() {
            None
        } else {
            Some(logging)
        };

        let config = ContainerConfig {
            max_resolution_depth,
            compile_cache_enabled,
            track_disposable_transients,
            root_scope_name,
            logging,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_resolution_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_resolution_depth".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.root_scope_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "root_scope_name".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if let Some(logging) = &self.logging {
            if let Some(level) = &logging.level {
                if !LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
                    return Err(ConfigError::InvalidValue {
                        field: "logging.level".to_string(),
                        reason: format!("unknown level '{}'", level),
                    });
                }
            }
            if let Some(format) = &logging.format {
                if !LOG_FORMATS.contains(&format.to_lowercase().as_str()) {
                    return Err(ConfigError::InvalidValue {
                        field: "logging.format".to_string(),
                        reason: format!("unknown format '{}'", format),
                    });
                }
            }
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
