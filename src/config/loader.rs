use std::{collections::HashMap, env, fs, path::{Path, PathBuf}};
use crate::errors::ConfigError;

use super::container_config::{
    ContainerConfig, PartialContainerConfig, CONFIG_FILE_NAME, ENV_KEYS, USER_CONFIG_PATH,
};

/// Configuration loader responsible for loading config from files and environment
pub struct ConfigLoader {
    base_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default paths
    pub fn new() -> Self {
        Self { base_path: None }
    }

    /// Create a config loader with custom base path (for testing)
    pub fn with_base_path(base_path: PathBuf) -> Self {
        Self { base_path: Some(base_path) }
    }

    /// Load configuration from the config file and the process environment
    pub fn load_config(&self) -> Result<ContainerConfig, ConfigError> {
        let env_map = self.collect_env_vars();
        self.load_config_with_env(&env_map)
    }

    /// Load configuration from the config file and an explicit environment map
    pub fn load_config_with_env(
        &self,
        env_map: &HashMap<String, String>,
    ) -> Result<ContainerConfig, ConfigError> {
        let config_path = self.config_path();
        let partial_config = self.load_partial_config(&config_path)?;
        let config = ContainerConfig::from_partial_and_env(partial_config, env_map)?;

        tracing::debug!(
            path = %config_path.display(),
            max_resolution_depth = config.max_resolution_depth,
            compile_cache_enabled = config.compile_cache_enabled,
            "Container configuration loaded"
        );
        Ok(config)
    }

    /// Location of the configuration file
    pub fn config_path(&self) -> PathBuf {
        self.extract_file_path(USER_CONFIG_PATH, CONFIG_FILE_NAME)
    }

    /// Extract file path with tilde expansion and base path override
    fn extract_file_path(&self, base_dir: &str, file_name: &str) -> PathBuf {
        let expanded_base = if let Some(base_path) = &self.base_path {
            // For testing: use custom base path
            base_path.join(base_dir.trim_start_matches("~/"))
        } else {
            let expanded = shellexpand::tilde(base_dir);
            PathBuf::from(expanded.as_ref())
        };

        expanded_base.join(file_name)
    }

    /// A missing file is not an error; defaults apply
    fn load_partial_config(&self, config_path: &Path) -> Result<Option<PartialContainerConfig>, ConfigError> {
        if !config_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(config_path).map_err(|e| {
            ConfigError::FileRead(config_path.to_string_lossy().to_string(), e)
        })?;

        let partial_config: PartialContainerConfig = toml::from_str(&content).map_err(|e| {
            ConfigError::TomlParse(config_path.to_string_lossy().to_string(), e)
        })?;

        Ok(Some(partial_config))
    }

    /// Collect relevant environment variables
    fn collect_env_vars(&self) -> HashMap<String, String> {
        let mut env_map = HashMap::new();
        for key in &ENV_KEYS {
            if let Ok(value) = env::var(key) {
                env_map.insert(key.to_string(), value);
            }
        }
        env_map
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::container_config::ENV_TRACK_TRANSIENTS;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) {
        let config_dir = dir.path().join(".config/graft");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join(CONFIG_FILE_NAME), content).unwrap();
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_base_path(dir.path().to_path_buf());
        let config = loader.load_config_with_env(&HashMap::new()).unwrap();
        assert_eq!(config, ContainerConfig::default());
    }

    #[test]
    fn test_file_and_env_merge() {
        let dir = TempDir::new().unwrap();
        write_config(
            &dir,
            "max_resolution_depth = 8\ntrack_disposable_transients = true\n",
        );
        let loader = ConfigLoader::with_base_path(dir.path().to_path_buf());
        assert!(loader.config_path().starts_with(dir.path()));

        let mut env_map = HashMap::new();
        env_map.insert(ENV_TRACK_TRANSIENTS.to_string(), "false".to_string());
        let config = loader.load_config_with_env(&env_map).unwrap();

        assert_eq!(config.max_resolution_depth, 8);
        assert!(!config.track_disposable_transients);
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "max_resolution_depth = \"many\"");
        let loader = ConfigLoader::with_base_path(dir.path().to_path_buf());

        let err = loader.load_config_with_env(&HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::TomlParse(..)));
    }
}
