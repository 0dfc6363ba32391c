//! Runtime error types.

use aether_core::{ChatError, PlatformError};
use aether_framework::PluginError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    /// No factory is registered for a configured adapter type.
    #[error("Unknown {category} type '{kind}' for '{name}'")]
    UnknownType {
        category: &'static str,
        kind: String,
        name: String,
    },

    /// An adapter factory rejected its configuration.
    #[error("Failed to build {category} '{name}': {reason}")]
    AdapterInit {
        category: &'static str,
        name: String,
        reason: String,
    },

    /// A provider with this name is already registered.
    #[error("Provider already registered: {0}")]
    ProviderExists(String),

    #[error("Runtime is not running")]
    NotRunning,

    /// `stop` has run; the runtime cannot be started again.
    #[error("Runtime has been stopped")]
    Stopped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
