pub mod config;
pub mod errors;
pub mod infrastructure;
pub mod logging;

// Re-export commonly used items for convenience
pub use config::{ConfigLoader, ContainerConfig};
pub use errors::{ActivationError, ConfigError, DisposalError};
pub use infrastructure::container::{
    Disposable, ExportStrategy, Func0, Func1, Func2, Func3, InjectionContext, Lazy,
    LifetimeScope, ServiceContainer, ServiceLifetime,
};
