pub mod container_config;
pub mod loader;

// Re-export commonly used types
pub use container_config::{ContainerConfig, LogSettings, PartialContainerConfig};
pub use loader::ConfigLoader;

// Re-export constants
pub use container_config::{CONFIG_FILE_NAME, ENV_KEYS, USER_CONFIG_PATH};
