//! Configuration for the Aether runtime.
//!
//! Layered loading (defaults, profile file, main file, `AETHER_*`
//! environment, programmatic overrides) plus validation.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    AetherConfig, BusConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    PlatformConfig, PluginsConfig, ProviderConfig, RetryConfig, RuntimeConfig, SpanEventConfig,
    TimeoutConfig,
};
pub use validation::validate_config;
